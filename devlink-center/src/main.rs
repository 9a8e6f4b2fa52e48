//! devlink center — entry point.
//!
//! ```text
//! devlink-center                  Run with the default config path
//! devlink-center --config <path>  Load a custom config TOML
//! devlink-center --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod center;
mod config;

use center::Center;
use config::CenterConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "devlink-center", about = "devlink device center")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "devlink-center.toml")]
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
        let text = toml::to_string_pretty(&CenterConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let config = CenterConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("devlink-center v{}", env!("CARGO_PKG_VERSION"));
    info!("node: {}", config.node.name);
    info!("discovery port: {}", config.network.discovery_port);

    let mut center = Center::new(config);
    center.run().await
}
