use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ballast_config::BallastConfig;
use ballast_core::ControlPlane;
use ballast_exec::{ExecError, ExecutionBackend, ExecutionReport, NullBackend, SimulatedBackend};
use ballast_types::DeviceId;

fn items(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("item-{i:04}")).collect()
}

fn two_gpus() -> BallastConfig {
    let mut cfg = BallastConfig::default();
    cfg.scheduler.gpu_devices = vec![DeviceId(0), DeviceId(1)];
    cfg
}

#[tokio::test]
async fn batches_close_at_suggested_size() {
    let plane = ControlPlane::new(BallastConfig::default(), Arc::new(NullBackend)).unwrap();
    let outcomes = plane.process_all(items(600)).await;

    let sizes: Vec<_> = outcomes.iter().map(|o| o.items.len()).collect();
    assert_eq!(sizes, vec![256, 256, 88]);
    assert!(outcomes.iter().all(|o| o.success));
    assert_eq!(outcomes[0].items[0], "item-0000");
    assert_eq!(outcomes[0].suggested_batch_size, 256);
    assert_eq!(plane.snapshot().batcher.batch_size, 0);
}

#[tokio::test]
async fn memory_budget_closes_batches_first() {
    let mut cfg = BallastConfig::default();
    cfg.batcher.max_memory_mb = 0.005;
    let plane = ControlPlane::new(cfg, Arc::new(NullBackend)).unwrap();

    let outcomes = plane.process_all(items(9)).await;
    // Three 9-char items fit in 0.005 MB.
    let sizes: Vec<_> = outcomes.iter().map(|o| o.items.len()).collect();
    assert_eq!(sizes, vec![3, 3, 3]);
}

#[tokio::test]
async fn faster_device_gets_more_batches() {
    let backend = SimulatedBackend::new(0.01, 0.001).with_slowdown(DeviceId(1), 10.0);
    let mut cfg = two_gpus();
    cfg.control.available_memory_mb = 0.02;
    let plane = ControlPlane::new(cfg, Arc::new(backend)).unwrap();

    plane.process_all(items(400)).await;
    let counts = plane.snapshot().scheduler.request_counts;
    assert!(counts[&DeviceId(0)] > counts[&DeviceId(1)], "{counts:?}");
}

#[tokio::test]
async fn failures_feed_error_budget() {
    let backend = SimulatedBackend::default().with_failures_every(2);
    let mut cfg = BallastConfig::default();
    cfg.control.available_memory_mb = 0.02;
    let plane = ControlPlane::new(cfg, Arc::new(backend)).unwrap();

    let outcomes = plane.process_all(items(100)).await;
    assert_eq!(outcomes.len(), 10);
    assert_eq!(outcomes.iter().filter(|o| !o.success).count(), 5);

    let slo = plane.snapshot().slo;
    assert!((slo["error_rate"].current.unwrap() - 0.5).abs() < 1e-12);
    assert!(slo["error_rate"].violation);
    assert!(slo["availability"].violation);
    // Only successful batches are learned from.
    assert_eq!(plane.optimizer.stats().updates, 5);
}

struct Stuck;

#[async_trait]
impl ExecutionBackend for Stuck {
    async fn execute(&self, _device: DeviceId, _batch: &[String]) -> Result<ExecutionReport, ExecError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(ExecutionReport {
            actual_time: 5.0,
            memory_used: 0.0,
            success: true,
        })
    }
}

#[tokio::test]
async fn timeouts_are_reported_as_failures() {
    let mut cfg = BallastConfig::default();
    cfg.control.execution_timeout_ms = 20;
    let plane = ControlPlane::new(cfg, Arc::new(Stuck)).unwrap();

    plane.submit("hello").await;
    let outcome = plane.drain().await.expect("pending item");
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("timed out"));
    assert!(outcome.actual_time >= 0.02);

    let snap = plane.snapshot();
    assert!(snap.scheduler.loads[&DeviceId(0)] > 0.0);
    assert!(snap.slo["availability"].violation);
}

#[tokio::test]
async fn optimizer_retrains_from_loop_feedback() {
    let mut cfg = BallastConfig::default();
    cfg.control.available_memory_mb = 0.02;
    let plane = ControlPlane::new(cfg, Arc::new(SimulatedBackend::default())).unwrap();

    let outcomes = plane.process_all(items(1000)).await;
    assert_eq!(outcomes.len(), 100);
    plane.optimizer.wait_for_retrain();

    let stats = plane.optimizer.stats();
    assert_eq!(stats.updates, 100);
    assert_eq!(stats.retrains, 1);
    assert!(stats.model.is_some());

    let next = plane.optimizer.predict_optimal_batch_size(9, 0.02);
    assert!((8..=256).contains(&next));
}

#[test]
fn invalid_config_is_rejected() {
    let mut cfg = BallastConfig::default();
    cfg.scheduler.gpu_devices.clear();
    assert!(ControlPlane::new(cfg, Arc::new(NullBackend)).is_err());
}

#[tokio::test]
async fn snapshot_serializes() {
    let plane = ControlPlane::new(two_gpus(), Arc::new(NullBackend)).unwrap();
    plane.process_all(items(3)).await;
    let json = serde_json::to_value(plane.snapshot()).unwrap();
    assert!(json["slo"]["latency_p95"]["target"].is_number());
    assert!(json["scheduler"]["weights"]["0"].is_number());
}
