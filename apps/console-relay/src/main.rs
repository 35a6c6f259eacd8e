use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use console_relay::cli::{self, Cli, Commands};
use console_relay::{app, ServerConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("console_relay=info,tower_http=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(Cli::parse()).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        None => app::run(ServerConfig::try_from(cli.serve)?).await,
        Some(Commands::Serve(args)) => app::run(ServerConfig::try_from(args)?).await,
        Some(Commands::Tail(args)) => cli::run_tail(args).await,
        Some(Commands::Pages(args)) => cli::run_pages(args).await,
        Some(Commands::Exec {
            viewer,
            target,
            code,
            timeout_secs,
        }) => cli::run_exec(viewer, target, code, Duration::from_secs(timeout_secs)).await,
    }
}
