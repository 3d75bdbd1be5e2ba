use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use chat_relay::{
    cli::{Cli, Command},
    client,
    observer::TracingObserver,
    server::{Server, ServerConfig},
};

/// Used when `RUST_LOG` is unset or cannot be parsed.
const DEFAULT_LOG_FILTER: &str = "info";

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, filter::LevelFilter};

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // A subscriber may already be installed; keep whichever came first.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            let config = ServerConfig::from(args);
            let server = Server::bind(&config, Arc::new(TracingObserver)).await?;
            let addr = server.local_addr()?;
            info!("server listening on {}", addr);
            server.run_until_ctrl_c().await;
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
