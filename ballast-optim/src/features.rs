use ballast_types::{HistoryEntry, RingBuffer, ITEM_BASE_MEMORY_MB, MAX_BATCH_SIZE, MEMORY_PER_CHAR_MB, MIN_BATCH_SIZE};

pub const FEATURE_COUNT: usize = 9;

/// `[input, memory, input/memory, ln_1p(input), ln_1p(memory),
///   mean time, mean efficiency, std time, std efficiency]`
pub type FeatureVector = [f64; FEATURE_COUNT];

/// How many of the newest history entries feed the rolling statistics.
pub const STATS_WINDOW: usize = 50;

/// Share of the available memory the empirical formula is allowed to plan for.
const USABLE_MEMORY_FRACTION: f64 = 0.8;

/// Mean and population standard deviation of recent timings and efficiencies.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RecentStats {
    pub mean_time: f64,
    pub mean_efficiency: f64,
    pub std_time: f64,
    pub std_efficiency: f64,
}

impl RecentStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a HistoryEntry>) -> Self {
        let (times, effs): (Vec<f64>, Vec<f64>) =
            entries.into_iter().map(|e| (e.actual_time, e.efficiency)).unzip();
        let (mean_time, std_time) = mean_std(&times);
        let (mean_efficiency, std_efficiency) = mean_std(&effs);
        Self {
            mean_time,
            mean_efficiency,
            std_time,
            std_efficiency,
        }
    }

    /// Statistics over the newest [`STATS_WINDOW`] entries.
    pub fn from_history(history: &RingBuffer<HistoryEntry>) -> Self {
        Self::from_entries(history.tail(STATS_WINDOW))
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

pub fn extract(input_size: f64, available_memory: f64, stats: &RecentStats) -> FeatureVector {
    [
        input_size,
        available_memory,
        input_size / available_memory.max(0.1),
        input_size.ln_1p(),
        available_memory.ln_1p(),
        stats.mean_time,
        stats.mean_efficiency,
        stats.std_time,
        stats.std_efficiency,
    ]
}

/// Clamp a raw (possibly fractional) batch size into the allowed range.
/// Returns `None` for non-finite input.
pub fn clamp_batch_size(raw: f64) -> Option<usize> {
    if !raw.is_finite() {
        return None;
    }
    Some(raw.clamp(MIN_BATCH_SIZE as f64, MAX_BATCH_SIZE as f64) as usize)
}

/// Heuristic batch size: as many items as fit into 80% of the available memory.
pub fn empirical_batch_size(input_size: usize, available_memory: f64) -> usize {
    let per_item = ITEM_BASE_MEMORY_MB + input_size as f64 * MEMORY_PER_CHAR_MB;
    let usable = available_memory * USABLE_MEMORY_FRACTION;
    clamp_batch_size(usable / per_item).unwrap_or(MIN_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_history_gives_zero_stats() {
        let rb: RingBuffer<HistoryEntry> = RingBuffer::with_capacity(4);
        assert_eq!(RecentStats::from_history(&rb), RecentStats::default());
    }

    #[test]
    fn stats_use_population_std() {
        let entries = [
            HistoryEntry::new(10, 10, 1.0, 1.0),
            HistoryEntry::new(10, 10, 3.0, 1.0),
        ];
        let s = RecentStats::from_entries(&entries);
        assert!((s.mean_time - 2.0).abs() < 1e-12);
        assert!((s.std_time - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stats_only_see_recent_window() {
        let mut rb = RingBuffer::with_capacity(200);
        for _ in 0..100 {
            rb.push(HistoryEntry::new(1, 1, 100.0, 1.0));
        }
        for _ in 0..STATS_WINDOW {
            rb.push(HistoryEntry::new(1, 1, 2.0, 1.0));
        }
        let s = RecentStats::from_history(&rb);
        assert!((s.mean_time - 2.0).abs() < 1e-12);
        assert_eq!(s.std_time, 0.0);
    }

    #[test]
    fn feature_layout() {
        let f = extract(1000.0, 0.0, &RecentStats::default());
        assert_eq!(f[0], 1000.0);
        assert_eq!(f[2], 1000.0 / 0.1);
        assert!((f[3] - 1001f64.ln()).abs() < 1e-12);
        assert_eq!(f[4], 0.0);
    }

    #[test]
    fn clamp_rejects_nan_and_bounds_values() {
        assert_eq!(clamp_batch_size(f64::NAN), None);
        assert_eq!(clamp_batch_size(-5.0), Some(8));
        assert_eq!(clamp_batch_size(1e9), Some(256));
        assert_eq!(clamp_batch_size(42.9), Some(42));
    }
}
