use std::path::PathBuf;
use std::sync::Arc;

use ballast_config::BallastConfig;
use ballast_core::ControlPlane;
use ballast_exec::SimulatedBackend;
use ballast_optim::PredictiveBatchOptimizer;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ballast")]
struct Cli {
    /// YAML config file; falls back to $BALLAST_CONFIG, then defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Push a synthetic item stream through the control plane and print the final snapshot.
    Demo {
        #[arg(long, default_value_t = 2000)]
        items: usize,
        /// Make the last configured device this many times slower.
        #[arg(long, default_value_t = 3.0)]
        slowdown: f64,
        /// Fail every n-th batch (0 disables).
        #[arg(long, default_value_t = 0)]
        fail_every: u64,
    },
    /// Print the effective configuration.
    Config,
    /// Print the suggested batch size for an input size and memory budget.
    Predict {
        #[arg(long)]
        input_size: usize,
        #[arg(long, default_value_t = 1024.0)]
        available_memory: f64,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<BallastConfig> {
    Ok(match path {
        Some(p) => BallastConfig::from_path(p)?,
        None => BallastConfig::from_env()?,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Command::Demo {
            items,
            slowdown,
            fail_every,
        } => {
            let mut backend = SimulatedBackend::default().with_failures_every(fail_every);
            if let Some(last) = config.scheduler.gpu_devices.last().copied() {
                if config.scheduler.gpu_devices.len() > 1 {
                    backend = backend.with_slowdown(last, slowdown);
                }
            }
            let plane = ControlPlane::new(config, Arc::new(backend))?;

            // Mixed item lengths so the batcher sees both short and long inputs.
            let stream = (0..items).map(|i| "token ".repeat(1 + (i * 7919) % 64));
            let outcomes = plane.process_all(stream).await;
            plane.optimizer.wait_for_retrain();

            let failed = outcomes.iter().filter(|o| !o.success).count();
            tracing::info!(batches = outcomes.len(), failed, "demo finished");
            println!("{}", serde_json::to_string_pretty(&plane.snapshot())?);
        }
        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
        Command::Predict {
            input_size,
            available_memory,
        } => {
            let optimizer = PredictiveBatchOptimizer::new(config.optimizer);
            println!("{}", optimizer.predict_optimal_batch_size(input_size, available_memory));
        }
    }

    Ok(())
}
