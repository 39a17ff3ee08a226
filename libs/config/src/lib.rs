//! # Kiosk Configuration
//!
//! Configuration loading and default values for the kiosk sync agent.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kiosk_config::KioskConfig;
//! use std::path::Path;
//!
//! let config = KioskConfig::load(Some(Path::new("config/kiosk.toml")), Some("production"))?;
//! println!("syncing with {}", config.endpoint());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod defaults;
pub mod kiosk_config;

pub use kiosk_config::{
    load_config, DeviceSettings, KioskConfig, LoggingSettings, ServerSettings, SyncSettings,
    DEFAULT_CONFIG_PATH, ENV_PREFIX,
};
