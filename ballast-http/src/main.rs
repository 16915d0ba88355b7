use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use ballast_config::BallastConfig;
use ballast_core::{ControlPlane, ControlSnapshot};
use ballast_exec::{ExecutionBackend, NullBackend, SimulatedBackend};
use ballast_slo::SliStatus;

#[derive(Clone)]
struct AppState {
    plane: Arc<ControlPlane>,
}

#[derive(Debug, Serialize)]
struct SloResponse {
    healthy: bool,
    objectives: BTreeMap<String, SliStatus>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BallastConfig::from_env()?;
    let demo_load = std::env::var("BALLAST_DEMO_LOAD")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let backend: Arc<dyn ExecutionBackend> = if demo_load {
        Arc::new(SimulatedBackend::default().realtime(true))
    } else {
        Arc::new(NullBackend)
    };
    let plane = Arc::new(ControlPlane::new(config, backend)?);

    // Synthetic traffic so the status endpoints have something to show.
    if demo_load {
        let plane_load = Arc::clone(&plane);
        tokio::spawn(async move {
            let mut i: usize = 0;
            loop {
                let item = "token ".repeat(1 + (i * 7919) % 64);
                plane_load.submit(&item).await;
                i = i.wrapping_add(1);
                if i % 64 == 0 {
                    plane_load.drain().await;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
    }

    let app = app(AppState { plane });

    let addr: SocketAddr = std::env::var("BALLAST_HTTP_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:7000".into())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("ballast status server listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/slo", get(slo_status))
        .route("/v1/stats", get(stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn slo_status(State(state): State<AppState>) -> Json<SloResponse> {
    let objectives = state.plane.slo.sli_status();
    let healthy = objectives.values().all(|s| !s.violation);
    Json(SloResponse { healthy, objectives })
}

async fn stats(State(state): State<AppState>) -> Json<ControlSnapshot> {
    Json(state.plane.snapshot())
}
