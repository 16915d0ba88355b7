use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod ring;
pub use ring::RingBuffer;

/// Fixed per-item overhead of the memory model, in MB.
pub const ITEM_BASE_MEMORY_MB: f64 = 0.0015;

/// Memory attributed to each character of an item, in MB.
pub const MEMORY_PER_CHAR_MB: f64 = 0.000001;

/// Smallest batch size the optimizer will ever hand out.
pub const MIN_BATCH_SIZE: usize = 8;

/// Largest batch size the optimizer will ever hand out.
pub const MAX_BATCH_SIZE: usize = 256;

/// Estimated memory footprint of an item of `len` characters.
pub fn estimate_item_memory_mb(len: usize) -> f64 {
    ITEM_BASE_MEMORY_MB + len as f64 * MEMORY_PER_CHAR_MB
}

/// Identifier of an execution device (GPU ordinal).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpu{}", self.0)
    }
}

/// Metadata about a batch flowing through the control plane.
#[derive(Clone, Debug)]
pub struct BatchMeta {
    pub id: Uuid,
    /// Number of items in the batch.
    pub items: usize,
    /// Average item length in characters.
    pub avg_input_size: usize,
}

impl BatchMeta {
    pub fn for_items(items: &[String]) -> Self {
        let total: usize = items.iter().map(|s| s.chars().count()).sum();
        let avg_input_size = if items.is_empty() { 0 } else { total / items.len() };
        Self {
            id: Uuid::new_v4(),
            items: items.len(),
            avg_input_size,
        }
    }
}

/// One observation of an executed batch, as kept by the optimizer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub input_size: usize,
    pub batch_size: usize,
    /// Wall time of the execution in seconds.
    pub actual_time: f64,
    pub memory_used: f64,
    /// Items per second.
    pub efficiency: f64,
}

impl HistoryEntry {
    pub fn new(input_size: usize, batch_size: usize, actual_time: f64, memory_used: f64) -> Self {
        Self {
            input_size,
            batch_size,
            actual_time,
            memory_used,
            efficiency: batch_size as f64 / actual_time.max(0.001),
        }
    }
}
