use async_trait::async_trait;
use ballast_types::DeviceId;
use serde::Serialize;
use thiserror::Error;

pub mod simulated;
pub use simulated::SimulatedBackend;

/// What the backend observed while running one batch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ExecutionReport {
    /// Wall time in seconds.
    pub actual_time: f64,
    /// Peak memory in MB.
    pub memory_used: f64,
    pub success: bool,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("device {0} unavailable")]
    DeviceUnavailable(DeviceId),
    #[error("execution timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
}

/// The model-execution backend the control plane feeds.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, device: DeviceId, batch: &[String]) -> Result<ExecutionReport, ExecError>;
}

/// Dummy implementation: every batch succeeds instantly.
pub struct NullBackend;

#[async_trait]
impl ExecutionBackend for NullBackend {
    async fn execute(&self, _device: DeviceId, _batch: &[String]) -> Result<ExecutionReport, ExecError> {
        Ok(ExecutionReport {
            actual_time: 0.0,
            memory_used: 0.0,
            success: true,
        })
    }
}
