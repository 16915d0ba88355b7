use std::collections::{BTreeMap, HashMap};

use ballast_config::SchedulerConfig;
use ballast_types::DeviceId;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

/// Constant added to every score denominator so idle devices don't divide by zero.
const SCORE_EPSILON: f64 = 0.1;

/// Core device-selection interface.
pub trait DeviceScheduler: Send + Sync {
    /// Pick the device that should run the next batch.
    fn select_device(&self, estimated_time: f64) -> DeviceId;

    /// Feed back how a batch actually went on `device`.
    fn update_performance(&self, device: DeviceId, actual_time: f64, items_processed: usize);

    fn stats(&self) -> SchedulerStats;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedError {
    #[error("scheduler needs at least one device")]
    NoDevices,
    #[error("device {0} listed twice")]
    DuplicateDevice(DeviceId),
}

/// Copies of the per-device state maps.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub weights: BTreeMap<DeviceId, f64>,
    pub loads: BTreeMap<DeviceId, f64>,
    pub performance: BTreeMap<DeviceId, f64>,
    pub request_counts: BTreeMap<DeviceId, u64>,
}

#[derive(Clone, Debug)]
struct DeviceState {
    id: DeviceId,
    weight: f64,
    /// EMA of observed completion time.
    load: f64,
    /// Inverse of the last completion time.
    performance: f64,
    request_count: u64,
}

impl DeviceState {
    fn new(id: DeviceId) -> Self {
        Self {
            id,
            weight: 1.0,
            load: 0.0,
            performance: 0.0,
            request_count: 0,
        }
    }

    fn score(&self, estimated_time: f64) -> f64 {
        self.weight / (self.load + estimated_time + SCORE_EPSILON)
    }
}

/// Weighted scheduler: picks the device maximizing `weight / (load + cost)`,
/// with weight and load tracked as EMAs of observed throughput and latency.
pub struct WeightedGpuScheduler {
    alpha: f64,
    inner: Mutex<Inner>,
}

struct Inner {
    /// Iteration order is the configured device order.
    devices: Vec<DeviceState>,
    index: HashMap<DeviceId, usize>,
}

impl WeightedGpuScheduler {
    pub fn new(devices: &[DeviceId]) -> Result<Self, SchedError> {
        Self::with_alpha(devices, 0.2)
    }

    pub fn with_alpha(devices: &[DeviceId], alpha: f64) -> Result<Self, SchedError> {
        if devices.is_empty() {
            return Err(SchedError::NoDevices);
        }
        let mut index = HashMap::with_capacity(devices.len());
        let mut states = Vec::with_capacity(devices.len());
        for (i, &id) in devices.iter().enumerate() {
            if index.insert(id, i).is_some() {
                return Err(SchedError::DuplicateDevice(id));
            }
            states.push(DeviceState::new(id));
        }
        Ok(Self {
            alpha,
            inner: Mutex::new(Inner {
                devices: states,
                index,
            }),
        })
    }

    pub fn from_config(cfg: &SchedulerConfig) -> Result<Self, SchedError> {
        Self::with_alpha(&cfg.gpu_devices, cfg.alpha)
    }
}

impl DeviceScheduler for WeightedGpuScheduler {
    fn select_device(&self, estimated_time: f64) -> DeviceId {
        let estimated_time = if estimated_time.is_finite() && estimated_time >= 0.0 {
            estimated_time
        } else {
            tracing::warn!(estimated_time, "invalid time estimate, using 0");
            0.0
        };

        let mut inner = self.inner.lock();

        // Strict comparison keeps the first device on ties.
        let mut best_idx = 0;
        let mut best_score = f64::MIN;
        for (i, dev) in inner.devices.iter().enumerate() {
            let score = dev.score(estimated_time);
            if score > best_score {
                best_score = score;
                best_idx = i;
            }
        }

        let dev = &mut inner.devices[best_idx];
        dev.request_count += 1;
        tracing::trace!(device = %dev.id, score = best_score, "device selected");
        dev.id
    }

    fn update_performance(&self, device: DeviceId, actual_time: f64, items_processed: usize) {
        if !actual_time.is_finite() || actual_time < 0.0 {
            tracing::warn!(%device, actual_time, "ignoring invalid completion time");
            return;
        }

        let alpha = self.alpha;
        let mut inner = self.inner.lock();
        let Some(&idx) = inner.index.get(&device) else {
            tracing::warn!(%device, "performance update for unknown device");
            return;
        };
        let dev = &mut inner.devices[idx];

        dev.load = alpha * actual_time + (1.0 - alpha) * dev.load;
        if actual_time > 0.0 {
            let throughput = items_processed as f64 / actual_time;
            dev.weight = alpha * throughput + (1.0 - alpha) * dev.weight;
        }
        dev.performance = 1.0 / actual_time.max(0.001);

        tracing::debug!(
            %device,
            load = dev.load,
            weight = dev.weight,
            "device performance updated"
        );
    }

    fn stats(&self) -> SchedulerStats {
        let inner = self.inner.lock();
        let mut stats = SchedulerStats::default();
        for d in &inner.devices {
            stats.weights.insert(d.id, d.weight);
            stats.loads.insert(d.id, d.load);
            stats.performance.insert(d.id, d.performance);
            stats.request_counts.insert(d.id, d.request_count);
        }
        stats
    }
}
