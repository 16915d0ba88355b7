use std::collections::{BTreeMap, VecDeque};

use ballast_config::{SloConfig, SloObjective};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How the samples of a window are reduced to one SLI value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    /// 95th percentile, linear interpolation between closest ranks.
    P95,
    /// Share of samples greater than zero.
    PositiveFraction,
    /// Share of samples exactly equal to one.
    UnitFraction,
    Mean,
}

/// Which side of the target is healthy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// SLI must stay at or below the target; budget is `target - sli`.
    AtMost,
    /// SLI must stay at or above the target; budget is `1 - sli`.
    AtLeast,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SloDefinition {
    pub name: &'static str,
    pub target: f64,
    pub window_seconds: f64,
    pub aggregation: Aggregation,
    pub direction: Direction,
}

impl SloDefinition {
    fn from_objective(name: &'static str, obj: SloObjective) -> Self {
        let (aggregation, direction) = match name {
            "latency_p95" => (Aggregation::P95, Direction::AtMost),
            "error_rate" => (Aggregation::PositiveFraction, Direction::AtMost),
            "availability" => (Aggregation::UnitFraction, Direction::AtLeast),
            _ => (Aggregation::Mean, Direction::AtMost),
        };
        Self {
            name,
            target: obj.target,
            window_seconds: obj.window_seconds,
            aggregation,
            direction,
        }
    }

    fn violated(&self, sli: f64) -> bool {
        match self.direction {
            Direction::AtMost => sli > self.target,
            Direction::AtLeast => sli < self.target,
        }
    }

    fn error_budget(&self, sli: f64) -> f64 {
        match self.direction {
            Direction::AtMost => self.target - sli,
            Direction::AtLeast => 1.0 - sli,
        }
    }
}

/// Exported health of one objective. `current` and `error_budget` are `None`
/// until the window holds at least one sample.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SliStatus {
    pub current: Option<f64>,
    pub target: f64,
    pub error_budget: Option<f64>,
    pub violation: bool,
    pub samples: usize,
}

struct SliWindow {
    def: SloDefinition,
    /// `(value, timestamp)` in arrival order.
    samples: VecDeque<(f64, f64)>,
    current: Option<f64>,
}

impl SliWindow {
    fn new(def: SloDefinition) -> Self {
        Self {
            def,
            samples: VecDeque::new(),
            current: None,
        }
    }

    fn record(&mut self, value: f64, timestamp: f64) {
        self.samples.push_back((value, timestamp));
        let cutoff = timestamp - self.def.window_seconds;
        self.samples.retain(|&(_, ts)| ts > cutoff);
        self.current = aggregate(self.def.aggregation, self.samples.iter().map(|&(v, _)| v));
    }

    fn status(&self) -> SliStatus {
        SliStatus {
            current: self.current,
            target: self.def.target,
            error_budget: self.current.map(|sli| self.def.error_budget(sli)),
            violation: self.current.map_or(false, |sli| self.def.violated(sli)),
            samples: self.samples.len(),
        }
    }
}

fn aggregate(kind: Aggregation, values: impl Iterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let sli = match kind {
        Aggregation::P95 => percentile(values, 0.95),
        Aggregation::PositiveFraction => values.iter().filter(|v| **v > 0.0).count() as f64 / n,
        Aggregation::UnitFraction => values.iter().filter(|v| **v == 1.0).count() as f64 / n,
        Aggregation::Mean => values.iter().sum::<f64>() / n,
    };
    Some(sli)
}

fn percentile(mut values: Vec<f64>, q: f64) -> f64 {
    values.sort_by(f64::total_cmp);
    let rank = q * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (rank - lo as f64)
}

/// Tracks rolling SLIs for the predefined objectives and derives error budgets.
pub struct SloTracker {
    windows: Mutex<BTreeMap<&'static str, SliWindow>>,
}

impl SloTracker {
    pub fn new(cfg: &SloConfig) -> Self {
        let windows = cfg
            .objectives()
            .into_iter()
            .map(|(name, obj)| (name, SliWindow::new(SloDefinition::from_objective(name, obj))))
            .collect();
        Self {
            windows: Mutex::new(windows),
        }
    }

    /// Record one sample. Unknown objectives, negative or non-finite values and
    /// non-finite timestamps are logged and dropped; returns whether the sample was kept.
    pub fn record_metric(&self, slo_name: &str, value: f64, timestamp: f64) -> bool {
        if !value.is_finite() || value < 0.0 {
            tracing::warn!(slo = slo_name, value, "rejecting invalid SLI sample");
            return false;
        }
        if !timestamp.is_finite() {
            tracing::warn!(slo = slo_name, timestamp, "rejecting SLI sample with invalid timestamp");
            return false;
        }

        let mut windows = self.windows.lock();
        let Some(window) = windows.get_mut(slo_name) else {
            tracing::warn!(slo = slo_name, "unknown SLO");
            return false;
        };
        window.record(value, timestamp);

        if let Some(sli) = window.current {
            if window.def.violated(sli) {
                tracing::debug!(slo = slo_name, sli, target = window.def.target, "SLO in violation");
            }
        }
        true
    }

    /// Record a sample stamped with the current wall clock.
    pub fn record_metric_now(&self, slo_name: &str, value: f64) -> bool {
        self.record_metric(slo_name, value, unix_now())
    }

    pub fn check_slo_violation(&self) -> BTreeMap<String, bool> {
        self.windows
            .lock()
            .iter()
            .map(|(name, w)| (name.to_string(), w.status().violation))
            .collect()
    }

    pub fn sli_status(&self) -> BTreeMap<String, SliStatus> {
        self.windows
            .lock()
            .iter()
            .map(|(name, w)| (name.to_string(), w.status()))
            .collect()
    }
}

impl Default for SloTracker {
    fn default() -> Self {
        Self::new(&SloConfig::default())
    }
}

/// Seconds since the Unix epoch with microsecond resolution.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
