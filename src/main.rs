// Entry point for the analysis service

use gazette_analysis::{Config, Result, Service, run_with_shutdown};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gazette_analysis=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // First argument, then GAZETTE_ANALYSIS_CONFIG, then built-in defaults
    let config_path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("GAZETTE_ANALYSIS_CONFIG"))
        .map(PathBuf::from);

    let config = match config_path {
        Some(path) => {
            let config = Config::from_file(&path)?;
            tracing::info!(path = %path.display(), "Configuration loaded");
            config
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            Config::default()
        }
    };

    let service = Service::new(config).await?;
    run_with_shutdown(service).await
}
