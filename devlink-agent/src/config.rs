//! Configuration for the devlink agent.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use devlink_core::{Announcement, ManagerConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Node and service identity.
    pub agent: IdentityConfig,
    /// Device description answered to identity queries.
    pub device: DeviceConfig,
    /// Network settings.
    pub network: NetworkConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Node and service identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Stable node id announced to peers.
    pub name: String,
    /// Service name consumers connect by.
    pub service: String,
}

/// Device description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub vendor: String,
    /// Simulate Idle/Acquiring transitions for demo setups.
    pub simulate: bool,
    /// Seconds between simulated transitions.
    pub simulate_interval_secs: u64,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port the agent accepts connections on.
    pub listen_port: u16,
    /// UDP port announcements are broadcast on.
    pub discovery_port: u16,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent: IdentityConfig::default(),
            device: DeviceConfig::default(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "agent-01".into(),
            service: "scanner-1".into(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            model: "LNX-2300".into(),
            serial: "A73-00142".into(),
            firmware: "2.4.1".into(),
            vendor: "Lumina".into(),
            simulate: false,
            simulate_interval_secs: 10,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 9400,
            discovery_port: devlink_core::DEFAULT_DISCOVERY_PORT,
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

impl AgentConfig {
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

    /// Translate into the core manager settings, announcing our
    /// service.
    pub fn to_manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new(self.agent.name.clone()).with_announce(
            Announcement::new(
                self.agent.service.clone(),
                self.agent.name.clone(),
                self.network.listen_port,
                self.device.model.clone(),
            ),
        );
        config.discovery_port = self.network.discovery_port;
        config
    }

    pub fn simulate_interval(&self) -> Duration {
        Duration::from_secs(self.device.simulate_interval_secs.max(1))
    }
}

// ── Tests ────────────────────────────────────────────────────────
