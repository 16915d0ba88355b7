use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use ballast_types::{estimate_item_memory_mb, DeviceId};
use parking_lot::Mutex;

use crate::{ExecError, ExecutionBackend, ExecutionReport};

/// Deterministic stand-in for a GPU fleet.
///
/// Batch time is `(overhead + items * per_item) * slowdown(device)`; memory is
/// the batcher's own estimate of the items.
pub struct SimulatedBackend {
    overhead_s: f64,
    per_item_s: f64,
    slowdown: HashMap<DeviceId, f64>,
    /// Every n-th call reports failure.
    fail_every: Option<u64>,
    /// Actually sleep for the simulated time.
    realtime: bool,
    calls: Mutex<u64>,
}

impl SimulatedBackend {
    pub fn new(overhead_s: f64, per_item_s: f64) -> Self {
        Self {
            overhead_s,
            per_item_s,
            slowdown: HashMap::new(),
            fail_every: None,
            realtime: false,
            calls: Mutex::new(0),
        }
    }

    /// Make `device` `factor` times slower than the baseline.
    pub fn with_slowdown(mut self, device: DeviceId, factor: f64) -> Self {
        self.slowdown.insert(device, factor);
        self
    }

    pub fn with_failures_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn realtime(mut self, on: bool) -> Self {
        self.realtime = on;
        self
    }

    pub fn calls(&self) -> u64 {
        *self.calls.lock()
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(0.01, 0.0005)
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedBackend {
    async fn execute(&self, device: DeviceId, batch: &[String]) -> Result<ExecutionReport, ExecError> {
        let call = {
            let mut calls = self.calls.lock();
            *calls += 1;
            *calls
        };

        let factor = self.slowdown.get(&device).copied().unwrap_or(1.0);
        if factor <= 0.0 {
            return Err(ExecError::DeviceUnavailable(device));
        }

        let actual_time = (self.overhead_s + batch.len() as f64 * self.per_item_s) * factor;
        if self.realtime {
            tokio::time::sleep(Duration::from_secs_f64(actual_time)).await;
        }

        let memory_used = batch.iter().map(|s| estimate_item_memory_mb(s.chars().count())).sum();
        let success = self.fail_every.map_or(true, |n| call % n != 0);
        tracing::trace!(%device, items = batch.len(), actual_time, success, "simulated batch");

        Ok(ExecutionReport {
            actual_time,
            memory_used,
            success,
        })
    }
}
