use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ballast_batch::{BatcherStats, MemoryAwareBatcher};
use ballast_config::BallastConfig;
use ballast_exec::{ExecError, ExecutionBackend, ExecutionReport};
use ballast_optim::{OptimizerStats, PredictiveBatchOptimizer};
use ballast_sched::{DeviceScheduler, SchedulerStats, WeightedGpuScheduler};
use ballast_slo::{SliStatus, SloTracker};
use ballast_types::{BatchMeta, DeviceId};
use serde::Serialize;
use uuid::Uuid;

/// Result of running one assembled batch.
#[derive(Clone, Debug, Serialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub device: DeviceId,
    pub items: Vec<String>,
    pub avg_input_size: usize,
    /// Batch size the optimizer suggested when this batch was closed.
    pub suggested_batch_size: usize,
    pub actual_time: f64,
    pub memory_used: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time view of every component, for status export.
#[derive(Clone, Debug, Serialize)]
pub struct ControlSnapshot {
    pub batcher: BatcherStats,
    pub scheduler: SchedulerStats,
    pub optimizer: OptimizerStats,
    pub slo: BTreeMap<String, SliStatus>,
}

/// The control loop: wires batcher, optimizer, scheduler and SLO tracker
/// around an execution backend.
pub struct ControlPlane {
    pub config: BallastConfig,
    pub batcher: Arc<MemoryAwareBatcher>,
    pub scheduler: Arc<dyn DeviceScheduler>,
    pub optimizer: Arc<PredictiveBatchOptimizer>,
    pub slo: Arc<SloTracker>,
    pub backend: Arc<dyn ExecutionBackend>,
}

impl ControlPlane {
    pub fn new(config: BallastConfig, backend: Arc<dyn ExecutionBackend>) -> anyhow::Result<Self> {
        config.validate()?;
        let scheduler = WeightedGpuScheduler::from_config(&config.scheduler)?;
        Ok(Self {
            batcher: Arc::new(MemoryAwareBatcher::from_config(&config.batcher)),
            scheduler: Arc::new(scheduler),
            optimizer: Arc::new(PredictiveBatchOptimizer::new(config.optimizer.clone())),
            slo: Arc::new(SloTracker::new(&config.slo)),
            backend,
            config,
        })
    }

    /// Feed one item. Returns the outcome of a batch if this item closed one,
    /// either by overflowing the memory budget or by reaching the suggested size.
    pub async fn submit(&self, item: &str) -> Option<BatchOutcome> {
        let input_size = item.chars().count();
        let suggested = self
            .optimizer
            .predict_optimal_batch_size(input_size, self.config.control.available_memory_mb);

        let ready = match self.batcher.add_item(item) {
            Some(batch) => Some(batch),
            None if self.batcher.len() >= suggested => self.batcher.flush(),
            None => None,
        };

        match ready {
            Some(batch) => Some(self.execute_batch(batch, suggested).await),
            None => None,
        }
    }

    /// Flush and run whatever is still pending (end of stream).
    pub async fn drain(&self) -> Option<BatchOutcome> {
        let batch = self.batcher.flush()?;
        let suggested = batch.len();
        Some(self.execute_batch(batch, suggested).await)
    }

    /// Submit every item, then drain.
    pub async fn process_all<I, S>(&self, items: I) -> Vec<BatchOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut outcomes = Vec::new();
        for item in items {
            if let Some(outcome) = self.submit(item.as_ref()).await {
                outcomes.push(outcome);
            }
        }
        if let Some(outcome) = self.drain().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            batcher: self.batcher.stats(),
            scheduler: self.scheduler.stats(),
            optimizer: self.optimizer.stats(),
            slo: self.slo.sli_status(),
        }
    }

    async fn execute_batch(&self, batch: Vec<String>, suggested: usize) -> BatchOutcome {
        let meta = BatchMeta::for_items(&batch);
        let device = self.scheduler.select_device(self.optimizer.recent_mean_time());
        let timeout = Duration::from_millis(self.config.control.execution_timeout_ms);

        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, self.backend.execute(device, &batch)).await {
            Ok(res) => res,
            Err(_) => Err(ExecError::Timeout {
                after_ms: self.config.control.execution_timeout_ms,
            }),
        };
        let elapsed = started.elapsed().as_secs_f64();

        let (report, error) = match result {
            Ok(report) => (report, None),
            Err(e) => {
                tracing::warn!(batch_id = %meta.id, %device, error = %e, "batch execution failed");
                let report = ExecutionReport {
                    actual_time: elapsed,
                    memory_used: 0.0,
                    success: false,
                };
                (report, Some(e.to_string()))
            }
        };

        self.feed_back(&meta, device, &report);
        tracing::debug!(
            batch_id = %meta.id,
            %device,
            items = meta.items,
            actual_time = report.actual_time,
            success = report.success,
            "batch executed"
        );

        BatchOutcome {
            batch_id: meta.id,
            device,
            avg_input_size: meta.avg_input_size,
            items: batch,
            suggested_batch_size: suggested,
            actual_time: report.actual_time,
            memory_used: report.memory_used,
            success: report.success,
            error,
        }
    }

    /// Failures are fed back too, so load and error-rate accounting stay honest.
    fn feed_back(&self, meta: &BatchMeta, device: DeviceId, report: &ExecutionReport) {
        if report.success {
            self.scheduler
                .update_performance(device, report.actual_time, meta.items);
            self.optimizer.update_model(
                meta.avg_input_size,
                meta.items,
                report.actual_time,
                report.memory_used,
            );
        } else {
            self.scheduler.update_performance(device, report.actual_time, 0);
        }

        let ok = if report.success { 1.0 } else { 0.0 };
        self.slo.record_metric_now("latency_p95", report.actual_time);
        self.slo.record_metric_now("error_rate", 1.0 - ok);
        self.slo.record_metric_now("availability", ok);
    }
}
