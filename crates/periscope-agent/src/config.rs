//! Agent configuration file management.
//!
//! Loaded from `<data_dir>/agent.toml`; every field has a default so a
//! missing file yields a working configuration.

use serde::{Deserialize, Serialize};

use crate::snapshot::SnapshotPolicy;

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Network settings.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Snapshot settings.
    #[serde(default)]
    pub snapshots: SnapshotConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// 0 = derive the port from the process id.
    #[serde(default)]
    pub port: u16,
    /// Bounded write-channel capacity per connection.
    #[serde(default = "default_write_channel_capacity")]
    pub write_channel_capacity: usize,
}

/// Snapshot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshots retained for debugging; 1 keeps only the current one.
    #[serde(default = "default_snapshot_retention")]
    pub retention: usize,
    /// Bounded retries for inconsistent heap walks.
    #[serde(default = "default_walk_retries")]
    pub walk_retries: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log files older than this many days are deleted at startup.
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u64,
    /// Default tracing filter directive.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_write_channel_capacity() -> usize {
    500
}

fn default_snapshot_retention() -> usize {
    1
}

fn default_walk_retries() -> u32 {
    3
}

fn default_log_retention_days() -> u64 {
    3
}

fn default_log_filter() -> String {
    "periscope=info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 0,
            write_channel_capacity: default_write_channel_capacity(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            retention: default_snapshot_retention(),
            walk_retries: default_walk_retries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            retention_days: default_log_retention_days(),
            filter: default_log_filter(),
        }
    }
}

impl AgentConfig {
    /// Load from the data directory, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = periscope_wire::handshake::data_dir().join("agent.toml");
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: AgentConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// The snapshot policy this configuration describes.
    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy {
            retention: self.snapshots.retention,
            walk_retries: self.snapshots.walk_retries,
        }
    }

    /// The effective listening port for this process.
    pub fn effective_port(&self, pid: u32) -> u16 {
        if self.network.port != 0 {
            self.network.port
        } else {
            periscope_wire::handshake::default_port(pid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.network.write_channel_capacity, 500);
        assert_eq!(config.snapshots.retention, 1);
        assert_eq!(config.logging.retention_days, 3);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            [network]
            port = 4050
            "#,
        )
        .expect("parse");
        assert_eq!(config.network.port, 4050);
        assert_eq!(config.network.write_channel_capacity, 500);
        assert_eq!(config.snapshots.walk_retries, 3);
    }

    #[test]
    fn test_effective_port() {
        let mut config = AgentConfig::default();
        assert_eq!(config.effective_port(4100), 4100);
        config.network.port = 9999;
        assert_eq!(config.effective_port(4100), 9999);
    }
}
