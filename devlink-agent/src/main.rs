//! devlink agent — entry point.
//!
//! ```text
//! devlink-agent                  Run with the default config path
//! devlink-agent --config <path>  Load a custom config TOML
//! devlink-agent --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod service;

use config::AgentConfig;
use service::Agent;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "devlink-agent", about = "devlink device agent")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "devlink-agent.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let config = AgentConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("devlink-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("service: {}", config.agent.service);
    info!("listen port: {}", config.network.listen_port);
    info!("discovery port: {}", config.network.discovery_port);

    let mut agent = Agent::new(config);
    agent.run().await
}
