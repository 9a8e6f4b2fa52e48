//! Configuration for the devlink center.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use devlink_core::ManagerConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterConfig {
    /// Node identity.
    pub node: NodeConfig,
    /// Network settings.
    pub network: NetworkConfig,
    /// Link-layer tuning.
    pub link: LinkConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Node identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable node id announced to peers.
    pub name: String,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port announcements are received on.
    pub discovery_port: u16,
}

/// Link-layer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Seconds before an unanswered request times out.
    pub request_timeout_secs: u64,
    /// Seconds before an unrefreshed service lease expires.
    pub service_ttl_secs: u64,
    /// Seconds between liveness pings to connected agents.
    pub ping_interval_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CenterConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            network: NetworkConfig::default(),
            link: LinkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "center-01".into(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: devlink_core::DEFAULT_DISCOVERY_PORT,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            service_ttl_secs: 6,
            ping_interval_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CenterConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let cfg = Self::default();
        let text = toml::to_string_pretty(&cfg)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, text)
    }

    /// Translate into the core manager settings.
    pub fn to_manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new(self.node.name.clone());
        config.discovery_port = self.network.discovery_port;
        config.request_timeout = Duration::from_secs(self.link.request_timeout_secs.max(1));
        config.service_ttl = Duration::from_secs(self.link.service_ttl_secs.max(1));
        config
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.link.ping_interval_secs.max(1))
    }
}

// ── Tests ────────────────────────────────────────────────────────
