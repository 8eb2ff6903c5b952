//! # Analysis Server
//!
//! Runs the compute-job server against a Redis transport and an Rserve
//! compute engine until interrupted.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use analysis_server::config::ConfigManager;
use analysis_server::constants::system::{SERVER_NAME, SERVER_VERSION};
use analysis_server::engine::RserveConnector;
use analysis_server::logging::init_structured_logging;
use analysis_server::messaging::RedisConnectionFactory;
use analysis_server::server::AnalysisServer;

#[derive(Parser)]
#[command(name = "analysis-server")]
#[command(about = "Run statistical analysis requests on a pool of compute-engine sessions")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (TOML, YAML or JSON); values can be overridden with
    /// ANALYSIS_SERVER__SECTION__KEY environment variables
    #[arg(short, long, env = "ANALYSIS_SERVER_CONFIG", default_value = "analysisServer.toml")]
    config: PathBuf,

    /// Print the effective configuration (credentials masked) and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_structured_logging();

    let manager = ConfigManager::load_from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
        return Ok(());
    }

    info!(name = SERVER_NAME, version = SERVER_VERSION, "🚀 Starting {SERVER_NAME} {SERVER_VERSION}");

    let config = manager.config();
    let factory = RedisConnectionFactory::new(&config.transport).context("failed to configure Redis transport")?;
    let connector = RserveConnector::new(&config.engine);

    let server = AnalysisServer::start(config, Arc::new(factory), Arc::new(connector))
        .context("failed to start analysis server")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    server.shutdown();
    Ok(())
}
