//! logcast - stream appended log lines over WebSocket.

use std::process::ExitCode;

use clap::Parser;
use logcast::{Cli, Config};

#[tokio::main]
async fn main() -> ExitCode {
    // Exits with status 2 when --file is missing
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("logcast=info")),
        )
        .init();

    let config = match Config::try_from(cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match logcast::run(config).await {
        Ok(()) => {
            tracing::info!("logcast has exited");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
