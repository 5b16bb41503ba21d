//! Configuration module for the script watcher.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`scriptwatch.toml`)
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SW_` and use double underscores
//! to separate nested levels:
//! - `SW_WATCH__POLL_INTERVAL_MS=250` sets `watch.poll_interval_ms`
//! - `SW_WATCH__PACKAGE_MARKER=mod.rhai` sets `watch.package_marker`
//! - `SW_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "scriptwatch.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Watch loop configuration
    #[serde(default)]
    pub watch: WatchConfig,

    /// Output relay configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Logging levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Cadence at which the host should call `tick()`, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// File whose presence marks a directory as part of a script package
    #[serde(default = "default_package_marker")]
    pub package_marker: String,

    /// Name of the entry function invoked in run-main mode
    #[serde(default = "default_entry_function")]
    pub entry_function: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayConfig {
    /// Prefix prepended to the first physical line of each write burst
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides, e.g. `session = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_false() -> bool {
    false
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_package_marker() -> String {
    "__init__.rhai".to_string()
}
fn default_entry_function() -> String {
    "main".to_string()
}
fn default_prefix() -> String {
    "[Script Watcher]: ".to_string()
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            watch: WatchConfig::default(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            package_marker: default_package_marker(),
            entry_function: default_entry_function(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, `scriptwatch.toml` and `SW_*` env vars,
    /// in increasing order of precedence.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed("SW_").split("__"))
            .extract()
    }

    /// The tick cadence as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch.poll_interval_ms)
    }
}
