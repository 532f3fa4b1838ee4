//! Plant Disease Prediction Server
//!
//! Loads a trained checkpoint once and serves predictions over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use plant_disease::utils::logging::{init_logging, LogConfig};
use plant_disease_server::{build_router, AppState};

/// Plant Disease Prediction Server
#[derive(Parser, Debug)]
#[command(name = "plant-disease-server")]
#[command(version)]
#[command(about = "HTTP prediction endpoint and dashboard for the plant disease classifier")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Checkpoint stem
    #[arg(short, long, env = "PLANT_DISEASE_MODEL", default_value = "models/plant_disease_model")]
    model: PathBuf,

    /// Label registry JSON
    #[arg(short, long, env = "PLANT_DISEASE_LABELS", default_value = "models/labels.json")]
    labels: PathBuf,

    /// Override the input resolution stored in the checkpoint
    #[arg(long)]
    image_size: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    info!("Plant Disease Server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Model:  {:?}", cli.model);
    info!("  Labels: {:?}", cli.labels);

    let state = AppState::load(&cli.model, &cli.labels, cli.image_size)?.shared();
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
