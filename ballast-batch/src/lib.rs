use ballast_config::BatcherConfig;
use ballast_types::estimate_item_memory_mb;
use parking_lot::Mutex;
use serde::Serialize;

/// Snapshot of the batch currently being assembled.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatcherStats {
    pub batch_size: usize,
    pub current_memory_mb: f64,
    pub max_memory_mb: f64,
}

/// Accumulates items into batches whose estimated memory stays within a budget.
///
/// An item that alone exceeds the budget is still accepted; it becomes a
/// one-item batch and is handed out on the next flush.
pub struct MemoryAwareBatcher {
    max_memory_mb: f64,
    inner: Mutex<Accumulator>,
}

#[derive(Default)]
struct Accumulator {
    items: Vec<String>,
    memory_mb: f64,
}

impl Accumulator {
    fn take(&mut self) -> Option<Vec<String>> {
        self.memory_mb = 0.0;
        if self.items.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.items))
        }
    }
}

impl MemoryAwareBatcher {
    /// A budget that is not a positive finite number falls back to the default.
    pub fn new(max_memory_mb: f64) -> Self {
        let max_memory_mb = if max_memory_mb.is_finite() && max_memory_mb > 0.0 {
            max_memory_mb
        } else {
            let fallback = BatcherConfig::default().max_memory_mb;
            tracing::warn!(max_memory_mb, fallback, "invalid batch memory budget, using default");
            fallback
        };
        Self {
            max_memory_mb,
            inner: Mutex::new(Accumulator::default()),
        }
    }

    pub fn from_config(cfg: &BatcherConfig) -> Self {
        Self::new(cfg.max_memory_mb)
    }

    pub fn max_memory_mb(&self) -> f64 {
        self.max_memory_mb
    }

    /// Add an item; returns the previous batch if this item would overflow it.
    ///
    /// Empty items are rejected without touching the current batch.
    pub fn add_item(&self, item: impl Into<String>) -> Option<Vec<String>> {
        let item = item.into();
        if item.is_empty() {
            tracing::warn!("rejecting empty batch item");
            return None;
        }

        let item_mb = estimate_item_memory_mb(item.chars().count());
        let mut acc = self.inner.lock();

        if acc.memory_mb + item_mb > self.max_memory_mb {
            let ready = acc.take();
            if item_mb > self.max_memory_mb {
                tracing::debug!(item_mb, max_mb = self.max_memory_mb, "oversized item batched alone");
            }
            acc.items.push(item);
            acc.memory_mb = item_mb;
            if let Some(batch) = &ready {
                tracing::debug!(size = batch.len(), "memory budget reached, flushing batch");
            }
            return ready;
        }

        acc.items.push(item);
        acc.memory_mb += item_mb;
        None
    }

    /// Drain whatever is pending, regardless of the budget.
    pub fn flush(&self) -> Option<Vec<String>> {
        self.inner.lock().take()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BatcherStats {
        let acc = self.inner.lock();
        BatcherStats {
            batch_size: acc.items.len(),
            current_memory_mb: acc.memory_mb,
            max_memory_mb: self.max_memory_mb,
        }
    }
}

impl Default for MemoryAwareBatcher {
    fn default() -> Self {
        Self::from_config(&BatcherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn invalid_budget_falls_back_to_default() {
        for budget in [f64::NAN, 0.0, -5.0, f64::INFINITY] {
            let batcher = MemoryAwareBatcher::new(budget);
            assert_eq!(batcher.max_memory_mb(), 1024.0, "{budget}");
        }

        let batcher = MemoryAwareBatcher::new(f64::NAN);
        assert!(batcher.add_item("a").is_none());
        let stats = batcher.stats();
        assert_eq!(stats.max_memory_mb, 1024.0);
        assert_eq!(stats.batch_size, 1);
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn flushes_previous_batch_when_budget_exceeded() {
        let batcher = MemoryAwareBatcher::new(0.005);
        assert_eq!(batcher.add_item("a"), None);
        assert_eq!(batcher.add_item("b"), None);
        assert!(approx(batcher.stats().current_memory_mb, 0.003002));

        let big = "c".repeat(2000);
        let ready = batcher.add_item(big.clone());
        assert_eq!(ready, Some(vec!["a".to_string(), "b".to_string()]));

        let stats = batcher.stats();
        assert_eq!(stats.batch_size, 1);
        assert!(approx(stats.current_memory_mb, 0.0035));
        assert_eq!(batcher.flush(), Some(vec![big]));
    }

    #[test]
    fn empty_item_is_rejected_without_state_change() {
        let batcher = MemoryAwareBatcher::new(1.0);
        batcher.add_item("x");
        let before = batcher.stats();
        assert_eq!(batcher.add_item(""), None);
        assert_eq!(batcher.stats(), before);
    }

    #[test]
    fn oversized_item_becomes_its_own_batch() {
        let batcher = MemoryAwareBatcher::new(0.002);
        let big = "z".repeat(5000);
        assert_eq!(batcher.add_item(big.clone()), None);
        assert_eq!(batcher.len(), 1);
        assert_eq!(batcher.add_item("a"), Some(vec![big]));
        assert_eq!(batcher.flush(), Some(vec!["a".to_string()]));
    }

    #[test]
    fn flush_on_empty_returns_none_and_resets() {
        let batcher = MemoryAwareBatcher::default();
        assert_eq!(batcher.flush(), None);
        batcher.add_item("hello");
        assert!(batcher.flush().is_some());
        let stats = batcher.stats();
        assert_eq!(stats.batch_size, 0);
        assert_eq!(stats.current_memory_mb, 0.0);
        assert_eq!(stats.max_memory_mb, 1024.0);
    }

    #[test]
    fn preserves_arrival_order() {
        let batcher = MemoryAwareBatcher::new(1.0);
        for s in ["one", "two", "three"] {
            batcher.add_item(s);
        }
        assert_eq!(
            batcher.flush(),
            Some(vec!["one".to_string(), "two".to_string(), "three".to_string()])
        );
    }

    proptest! {
        #[test]
        fn pending_memory_stays_within_budget(
            lens in prop::collection::vec(1usize..4000, 1..200),
            budget in 0.002f64..0.05,
        ) {
            let batcher = MemoryAwareBatcher::new(budget);
            let mut emitted = 0usize;
            for len in &lens {
                if let Some(batch) = batcher.add_item("q".repeat(*len)) {
                    emitted += batch.len();
                }
                let stats = batcher.stats();
                prop_assert!(stats.current_memory_mb <= budget + 1e-12 || stats.batch_size == 1);
            }
            let rest = batcher.flush().map(|b| b.len()).unwrap_or(0);
            prop_assert_eq!(emitted + rest, lens.len());
        }
    }
}
