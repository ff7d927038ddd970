#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sublum-import", version, about = "Route an MCP client's tool servers through the Subluminal shim")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rewrite `mcpServers`/`mcp_servers` entries to invoke the shim.
    Import {
        /// Path to the client config file (e.g. `claude_desktop_config.json`).
        config: PathBuf,
        /// Path the rewritten entries should invoke.
        #[arg(long, default_value = "sublum-shim")]
        shim_path: String,
    },
    /// Restore the config from its `.subluminal.bak` backup.
    Restore {
        /// Path to the client config file.
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new("sublum_importer=info")).init();

    let args = Args::parse();
    match args.command {
        Command::Import { config, shim_path } => {
            let summary = sublum_importer::import_config(&config, &shim_path)
                .with_context(|| format!("importing {}", config.display()))?;
            info!(
                rewritten = summary.rewritten,
                already_rewritten = summary.already_rewritten,
                backup_created = summary.backup_created,
                "import complete"
            );
        }
        Command::Restore { config } => {
            sublum_importer::restore_config(&config).with_context(|| format!("restoring {}", config.display()))?;
            info!("restore complete");
        }
    }
    Ok(())
}
