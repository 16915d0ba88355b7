//! Predictive batch-size optimizer.
//!
//! Keeps a bounded history of executed batches, trains a pluggable regression
//! backend on it in the background, and answers batch-size queries from the
//! trained model or, until one exists, from an empirical memory formula.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ballast_config::OptimizerConfig;
use ballast_types::{HistoryEntry, RingBuffer};
use parking_lot::Mutex;
use serde::Serialize;

pub mod backend;
pub mod features;
mod forest;
mod gbt;
mod tree;

pub use backend::{default_candidates, r2_score, BackendFactory, ModelError, RegressionBackend};
pub use features::{empirical_batch_size, FeatureVector, RecentStats};
pub use forest::RandomForest;
pub use gbt::GradientBoostedTrees;

const DEFAULT_INPUT_SIZE: usize = 1000;
const DEFAULT_AVAILABLE_MEMORY_MB: f64 = 1024.0;

/// The backend currently answering predictions.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelSummary {
    pub backend: &'static str,
    /// In-sample R^2 at training time.
    pub score: f64,
    pub trained_on: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OptimizerStats {
    pub history_len: usize,
    pub history_capacity: usize,
    pub updates: u64,
    pub retrains: u64,
    pub retraining: bool,
    pub model: Option<ModelSummary>,
}

#[derive(Clone)]
struct TrainedModel {
    backend: Arc<dyn RegressionBackend>,
    summary: ModelSummary,
}

struct State {
    history: RingBuffer<HistoryEntry>,
    model: Option<TrainedModel>,
    updates: u64,
    retrains: u64,
}

struct Shared {
    cfg: OptimizerConfig,
    candidates: Vec<BackendFactory>,
    state: Mutex<State>,
    retraining: AtomicBool,
}

pub struct PredictiveBatchOptimizer {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PredictiveBatchOptimizer {
    pub fn new(cfg: OptimizerConfig) -> Self {
        Self::with_backends(cfg, default_candidates())
    }

    /// Use an explicit, ordered list of regression backends.
    pub fn with_backends(cfg: OptimizerConfig, candidates: Vec<BackendFactory>) -> Self {
        let cfg = normalize(cfg);
        let state = State {
            history: RingBuffer::with_capacity(cfg.max_history),
            model: None,
            updates: 0,
            retrains: 0,
        };
        Self {
            shared: Arc::new(Shared {
                cfg,
                candidates,
                state: Mutex::new(state),
                retraining: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Suggested batch size for items of `input_size` characters, in `[8, 256]`.
    pub fn predict_optimal_batch_size(&self, input_size: usize, available_memory: f64) -> usize {
        let input_size = if input_size == 0 {
            tracing::warn!("input size must be positive, defaulting to {DEFAULT_INPUT_SIZE}");
            DEFAULT_INPUT_SIZE
        } else {
            input_size
        };
        let available_memory = if available_memory.is_finite() && available_memory > 0.0 {
            available_memory
        } else {
            tracing::warn!(
                available_memory,
                "available memory must be positive, defaulting to {DEFAULT_AVAILABLE_MEMORY_MB}"
            );
            DEFAULT_AVAILABLE_MEMORY_MB
        };

        let model_input = {
            let state = self.shared.state.lock();
            match &state.model {
                Some(model) if state.history.len() >= self.shared.cfg.min_history => {
                    let stats = RecentStats::from_history(&state.history);
                    Some((Arc::clone(&model.backend), stats))
                }
                _ => None,
            }
        };

        if let Some((backend, stats)) = model_input {
            let x = features::extract(input_size as f64, available_memory, &stats);
            match backend.predict(&x) {
                Ok(raw) => match features::clamp_batch_size(raw) {
                    Some(size) => return size,
                    None => tracing::warn!(backend = backend.name(), raw, "non-finite prediction, using heuristic"),
                },
                Err(e) => tracing::warn!(backend = backend.name(), error = %e, "prediction failed, using heuristic"),
            }
        }

        empirical_batch_size(input_size, available_memory)
    }

    /// Record an executed batch. Every `retrain_every` updates, once enough
    /// history exists, a retrain is started on a background thread.
    pub fn update_model(&self, input_size: usize, batch_size: usize, actual_time: f64, memory_used: f64) {
        if !actual_time.is_finite() || actual_time < 0.0 {
            tracing::warn!(actual_time, "ignoring observation with invalid time");
            return;
        }
        let memory_used = if memory_used.is_finite() { memory_used.max(0.0) } else { 0.0 };

        let should_retrain = {
            let mut state = self.shared.state.lock();
            state
                .history
                .push(HistoryEntry::new(input_size, batch_size, actual_time, memory_used));
            state.updates += 1;
            state.updates % self.shared.cfg.retrain_every == 0
                && state.history.len() >= self.shared.cfg.min_history
        };

        if should_retrain {
            self.spawn_retrain();
        }
    }

    /// Train synchronously on the calling thread. The optimizer lock is only
    /// held to snapshot history and to install the result.
    pub fn retrain(&self) -> Result<ModelSummary, ModelError> {
        self.shared.retrain()
    }

    /// Block until an in-flight background retrain, if any, has finished.
    pub fn wait_for_retrain(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("retrain worker panicked");
            }
        }
    }

    /// Mean execution time over the recent history window, 0 when empty.
    pub fn recent_mean_time(&self) -> f64 {
        RecentStats::from_history(&self.shared.state.lock().history).mean_time
    }

    pub fn history_len(&self) -> usize {
        self.shared.state.lock().history.len()
    }

    pub fn stats(&self) -> OptimizerStats {
        let state = self.shared.state.lock();
        OptimizerStats {
            history_len: state.history.len(),
            history_capacity: state.history.capacity(),
            updates: state.updates,
            retrains: state.retrains,
            retraining: self.shared.retraining.load(Ordering::Acquire),
            model: state.model.as_ref().map(|m| m.summary.clone()),
        }
    }

    fn spawn_retrain(&self) {
        if self.shared.retraining.swap(true, Ordering::AcqRel) {
            tracing::debug!("retrain already in flight, skipping");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("ballast-retrain".into())
            .spawn(move || {
                let _in_flight = InFlight(&shared.retraining);
                if let Err(e) = shared.retrain() {
                    tracing::warn!(error = %e, "background retrain failed");
                }
            });

        match spawned {
            Ok(handle) => {
                let previous = self.worker.lock().replace(handle);
                // The previous worker has already cleared the flag, so it is done or about to be.
                if let Some(prev) = previous {
                    if prev.join().is_err() {
                        tracing::error!("retrain worker panicked");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not start retrain worker");
                self.shared.retraining.store(false, Ordering::Release);
            }
        }
    }
}

/// Clears the retrain flag when the worker exits, including by panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Repair settings that would otherwise stall or panic the optimizer.
fn normalize(mut cfg: OptimizerConfig) -> OptimizerConfig {
    if cfg.max_history == 0 {
        tracing::warn!("max_history must be positive, using 1");
        cfg.max_history = 1;
    }
    if cfg.retrain_every == 0 {
        tracing::warn!("retrain_every must be positive, using 1");
        cfg.retrain_every = 1;
    }
    if cfg.min_history > cfg.max_history {
        tracing::warn!(
            min_history = cfg.min_history,
            max_history = cfg.max_history,
            "min_history exceeds max_history, capping"
        );
        cfg.min_history = cfg.max_history;
    }
    if !(cfg.training_available_memory_mb.is_finite() && cfg.training_available_memory_mb > 0.0) {
        tracing::warn!(
            memory = cfg.training_available_memory_mb,
            "training memory must be positive, defaulting to {DEFAULT_AVAILABLE_MEMORY_MB}"
        );
        cfg.training_available_memory_mb = DEFAULT_AVAILABLE_MEMORY_MB;
    }
    cfg
}

impl Default for PredictiveBatchOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl Shared {
    fn retrain(&self) -> Result<ModelSummary, ModelError> {
        let snapshot = self.state.lock().history.to_vec();
        if snapshot.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }

        // Features are rebuilt with a fixed assumed memory and the current
        // rolling stats; the label is the batch size that was actually used.
        let stats = RecentStats::from_entries(snapshot.iter().rev().take(features::STATS_WINDOW));
        let memory = self.cfg.training_available_memory_mb;
        let x: Vec<FeatureVector> = snapshot
            .iter()
            .map(|e| features::extract(e.input_size as f64, memory, &stats))
            .collect();
        let y: Vec<f64> = snapshot.iter().map(|e| e.batch_size as f64).collect();

        let mut best: Option<TrainedModel> = None;
        let mut available = 0usize;
        for factory in &self.candidates {
            let Some(mut backend) = factory() else { continue };
            available += 1;
            let name = backend.name();
            let score = match backend.fit(&x, &y).and_then(|_| backend.score(&x, &y)) {
                Ok(s) if s.is_finite() => s,
                Ok(s) => {
                    tracing::warn!(backend = name, score = s, "non-finite fit score, discarding");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(backend = name, error = %e, "backend failed to train");
                    continue;
                }
            };
            tracing::debug!(backend = name, score, samples = y.len(), "backend trained");
            if best.as_ref().map_or(true, |b| score > b.summary.score) {
                best = Some(TrainedModel {
                    backend: Arc::from(backend),
                    summary: ModelSummary {
                        backend: name,
                        score,
                        trained_on: y.len(),
                    },
                });
            }
        }

        let Some(model) = best else {
            if available == 0 {
                tracing::warn!("no regression backend available, keeping previous model");
                return Err(ModelError::NoBackendAvailable);
            }
            tracing::warn!("every regression backend failed, keeping previous model");
            return Err(ModelError::Backend {
                backend: "all",
                message: "no candidate trained successfully".into(),
            });
        };

        let summary = model.summary.clone();
        {
            let mut state = self.state.lock();
            state.model = Some(model);
            state.retrains += 1;
        }
        tracing::info!(backend = summary.backend, score = summary.score, samples = summary.trained_on, "batch size model retrained");
        Ok(summary)
    }
}
