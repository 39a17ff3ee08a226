//! Kiosk Configuration Module
//!
//! Loads the sync agent configuration from layered sources, later layers
//! winning:
//!
//! 1. built-in defaults ([`crate::defaults`])
//! 2. the TOML config file
//! 3. `<config dir>/environments/<env>.toml`, when an environment is named
//! 4. `KIOSK__<SECTION>__<KEY>` environment variables

use anyhow::{ensure, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::defaults;

/// Config file used when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "config/kiosk.toml";

/// Prefix of overriding environment variables
pub const ENV_PREFIX: &str = "KIOSK";

/// Complete agent configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct KioskConfig {
    pub server: ServerSettings,
    pub device: DeviceSettings,
    pub sync: SyncSettings,
    pub logging: LoggingSettings,
}

/// Where the sync server lives
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub address: String,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub send_timeout_secs: u64,
}

/// Identity stamped on outbound envelopes
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    pub name: String,
    pub protocol_version: String,
}

/// Heartbeat, reconnect and buffering policy
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    pub heartbeat_interval_secs: u64,
    pub max_heartbeat_failures: u32,
    pub reconnect_enabled: bool,
    pub reconnect_interval_secs: u64,
    /// 0 = unlimited
    pub max_reconnect_attempts: u32,
    pub read_buffer_size: usize,
    pub max_buffer_multiple: usize,
    pub dedup_capacity: usize,
    pub event_capacity: usize,
    pub command_queue_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: defaults::server::ADDRESS.to_string(),
            port: defaults::server::PORT,
            connect_timeout_secs: defaults::server::CONNECT_TIMEOUT_SECS,
            send_timeout_secs: defaults::server::SEND_TIMEOUT_SECS,
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            name: defaults::device::NAME.to_string(),
            protocol_version: defaults::device::PROTOCOL_VERSION.to_string(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: defaults::sync::HEARTBEAT_INTERVAL_SECS,
            max_heartbeat_failures: defaults::sync::MAX_HEARTBEAT_FAILURES,
            reconnect_enabled: defaults::sync::RECONNECT_ENABLED,
            reconnect_interval_secs: defaults::sync::RECONNECT_INTERVAL_SECS,
            max_reconnect_attempts: defaults::sync::MAX_RECONNECT_ATTEMPTS,
            read_buffer_size: defaults::sync::READ_BUFFER_SIZE,
            max_buffer_multiple: defaults::sync::MAX_BUFFER_MULTIPLE,
            dedup_capacity: defaults::sync::DEDUP_CAPACITY,
            event_capacity: defaults::sync::EVENT_CAPACITY,
            command_queue_capacity: defaults::sync::COMMAND_QUEUE_CAPACITY,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::logging::LEVEL.to_string(),
            json: false,
        }
    }
}

impl KioskConfig {
    /// Load configuration with environment overrides
    ///
    /// With `path` set the file must exist; otherwise
    /// [`DEFAULT_CONFIG_PATH`] is used if present.
    pub fn load(path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, environment, None)
    }

    /// As [`load`](Self::load), reading overrides from `env_vars` instead
    /// of the process environment when given
    pub fn load_with_env(
        path: Option<&Path>,
        environment: Option<&str>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let (base, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut builder = Config::builder()
            .add_source(
                Config::try_from(&KioskConfig::default())
                    .context("Failed to build default configuration")?,
            )
            .add_source(File::from(base.as_path()).required(required));
        debug!(path = %base.display(), required, "Loading config file");

        if let Some(env) = environment {
            let env_file = base
                .parent()
                .unwrap_or(Path::new("."))
                .join("environments")
                .join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env_vars),
        );

        let config: KioskConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the transport cannot run with
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.server.address.trim().is_empty(), "server.address must not be empty");
        ensure!(self.server.port != 0, "server.port must be non-zero");
        ensure!(!self.device.name.trim().is_empty(), "device.name must not be empty");
        ensure!(self.server.connect_timeout_secs > 0, "server.connect_timeout_secs must be positive");
        ensure!(self.server.send_timeout_secs > 0, "server.send_timeout_secs must be positive");
        ensure!(
            self.sync.heartbeat_interval_secs > 0,
            "sync.heartbeat_interval_secs must be positive"
        );
        ensure!(
            self.sync.reconnect_interval_secs > 0,
            "sync.reconnect_interval_secs must be positive"
        );
        ensure!(
            self.sync.max_heartbeat_failures > 0,
            "sync.max_heartbeat_failures must be positive"
        );
        ensure!(self.sync.dedup_capacity > 0, "sync.dedup_capacity must be positive");
        Ok(())
    }

    /// `host:port` of the sync server
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server.address, self.server.port)
    }

    /// Effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(environment: Option<&str>) -> Result<KioskConfig> {
    KioskConfig::load(None, environment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn no_env() -> Option<HashMap<String, String>> {
        Some(HashMap::new())
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");

        assert!(KioskConfig::load_with_env(Some(&missing), None, no_env()).is_err());

        let config = KioskConfig::default();
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.device.name, "KIOSK-01");
        assert_eq!(config.sync.heartbeat_interval_secs, 30);
        assert_eq!(config.sync.max_reconnect_attempts, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("kiosk.toml");

        let config_content = r#"
[server]
address = "10.20.0.5"
port = 9100

[device]
name = "LOBBY-02"

[logging]
json = true
"#;
        fs::write(&config_path, config_content).unwrap();

        let config = KioskConfig::load_with_env(Some(&config_path), None, no_env()).unwrap();

        assert_eq!(config.endpoint(), "10.20.0.5:9100");
        assert_eq!(config.device.name, "LOBBY-02");
        assert!(config.logging.json);
        // untouched sections keep their defaults
        assert_eq!(config.server.connect_timeout_secs, 3);
        assert_eq!(config.sync, SyncSettings::default());
    }

    #[test]
    fn test_environment_file_override() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("kiosk.toml");
        fs::write(&config_path, "[server]\naddress = \"10.0.0.1\"\n").unwrap();

        fs::create_dir(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("staging.toml"),
            "[server]\naddress = \"staging.sync.local\"\n\n[sync]\nreconnect_interval_secs = 15\n",
        )
        .unwrap();

        let config =
            KioskConfig::load_with_env(Some(&config_path), Some("staging"), no_env()).unwrap();
        assert_eq!(config.server.address, "staging.sync.local");
        assert_eq!(config.sync.reconnect_interval_secs, 15);

        // unknown environment falls back to the base file
        let config =
            KioskConfig::load_with_env(Some(&config_path), Some("qa"), no_env()).unwrap();
        assert_eq!(config.server.address, "10.0.0.1");
    }

    #[test]
    fn test_environment_variables_win() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("kiosk.toml");
        fs::write(&config_path, "[server]\nport = 9100\n").unwrap();

        let env = HashMap::from([
            ("KIOSK__SERVER__PORT".to_string(), "9200".to_string()),
            ("KIOSK__SYNC__RECONNECT_ENABLED".to_string(), "false".to_string()),
        ]);

        let config = KioskConfig::load_with_env(Some(&config_path), None, Some(env)).unwrap();
        assert_eq!(config.server.port, 9200);
        assert!(!config.sync.reconnect_enabled);
    }

    #[test]
    fn test_rendered_config_loads_back() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("kiosk.toml");

        let mut original = KioskConfig::default();
        original.device.name = "GARAGE-03".to_string();
        original.sync.max_reconnect_attempts = 12;
        fs::write(&config_path, original.to_toml_string().unwrap()).unwrap();

        let loaded = KioskConfig::load_with_env(Some(&config_path), None, no_env()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("kiosk.toml");
        fs::write(&config_path, "[sync]\nheartbeat_interval_secs = 0\n").unwrap();

        let err = KioskConfig::load_with_env(Some(&config_path), None, no_env()).unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval_secs"));
    }
}
