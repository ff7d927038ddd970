#![deny(unsafe_code)]

use clap::Parser;
use sublum_shim::cli::Args;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sublum_shim=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let exit_code = match sublum_shim::run(args).await {
        Ok(outcome) => {
            tracing::info!(status = ?outcome.status, exit_code = outcome.exit_code, "run finished");
            outcome.exit_code
        }
        Err(e) => {
            tracing::error!(error = %e, "run aborted before completion");
            e.exit_code()
        }
    };

    std::process::exit(exit_code);
}
