//! Configuration types and derived values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Network used when nothing else is configured
pub const DEFAULT_NETWORK: &str = "gaia-6002";

/// Base name of the lite-client daemon binary
pub const DAEMON_BINARY_BASE: &str = "gaiacli";

/// Errors raised while resolving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path of the config file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`ConfigFile`]
    #[error("Failed to parse config file {path}: {message}")]
    Parse {
        /// Path of the config file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// An override had a value that could not be interpreted
    #[error("Invalid value for {field}: {value}")]
    InvalidValue {
        /// Name of the field or environment variable
        field: String,
        /// Offending value
        value: String,
    },
}

/// Immutable process-wide settings
///
/// Built before any other component runs. The only field the UI may change
/// later is the mock-mode flag, and that lives on the controller, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Full node REST URL, queried for `/node_version`
    pub node_lcd: String,
    /// Full node RPC URL, handed to the daemon via `--node`
    pub node_rpc: String,
    /// Daemon REST port in development mode
    pub lcd_port: u16,
    /// Daemon REST port in packaged builds
    pub lcd_port_prod: u16,
    /// Development (or testing) build
    pub development: bool,
    /// UI runs against mocked data
    pub mocked: bool,
    /// Whether logs are written at all
    pub logging: bool,
    /// Explicit daemon binary, bypassing the resolution rules
    pub binary_path: Option<PathBuf>,
    /// Name of the network this build targets
    pub network: String,
    /// Template directory holding the network's genesis, config and version marker
    pub network_path: PathBuf,
    /// Persisted data directory
    pub root: PathBuf,
    /// Directory the packaged binaries and dev builds are resolved against
    pub resources_dir: PathBuf,
    /// Crash telemetry DSN; empty means nothing is ever transmitted
    pub sentry_dsn: String,
    /// Version of the running application
    pub app_version: String,
}

impl Default for Config {
    fn default() -> Self {
        let resources_dir = default_resources_dir();
        let network = DEFAULT_NETWORK.to_string();
        Self {
            node_lcd: "http://localhost:1317".to_string(),
            node_rpc: "http://localhost:26657".to_string(),
            lcd_port: 9070,
            lcd_port_prod: 8999,
            development: false,
            mocked: false,
            logging: true,
            binary_path: None,
            network_path: resources_dir.join("networks").join(&network),
            root: default_root(&network, false),
            network,
            resources_dir,
            sentry_dsn: String::new(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Config {
    /// Port the daemon's REST server listens on for this build
    pub fn active_lcd_port(&self) -> u16 {
        if self.development {
            self.lcd_port
        } else {
            self.lcd_port_prod
        }
    }

    /// Local URL of the daemon's REST server
    pub fn lcd_url(&self) -> String {
        format!("http://localhost:{}", self.active_lcd_port())
    }

    /// Home directory handed to the daemon
    pub fn lcd_home(&self) -> PathBuf {
        self.root.join("lcd")
    }

    /// Platform-specific daemon executable name
    pub fn daemon_binary_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", DAEMON_BINARY_BASE)
        } else {
            DAEMON_BINARY_BASE.to_string()
        }
    }

    /// Main diagnostic log inside the data directory
    pub fn main_log_path(&self) -> PathBuf {
        self.root.join("main.log")
    }
}

fn default_resources_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `~/.cosmos-voyager[-dev]/<network>`
pub fn default_root(network: &str, development: bool) -> PathBuf {
    let dir = if development {
        ".cosmos-voyager-dev"
    } else {
        ".cosmos-voyager"
    };
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(dir)
        .join(network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_port_follows_development_flag() {
        let mut config = Config::default();
        assert_eq!(config.active_lcd_port(), 8999);
        config.development = true;
        assert_eq!(config.active_lcd_port(), 9070);
        assert_eq!(config.lcd_url(), "http://localhost:9070");
    }

    #[test]
    fn test_lcd_home_is_inside_root() {
        let config = Config {
            root: PathBuf::from("/data/voyager"),
            ..Config::default()
        };
        assert_eq!(config.lcd_home(), PathBuf::from("/data/voyager/lcd"));
        assert_eq!(config.main_log_path(), PathBuf::from("/data/voyager/main.log"));
    }

    #[test]
    fn test_default_root_uses_dev_suffix() {
        let root = default_root("gaia-7000", true);
        assert!(root.ends_with(".cosmos-voyager-dev/gaia-7000"));
        let root = default_root("gaia-7000", false);
        assert!(root.ends_with(".cosmos-voyager/gaia-7000"));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_binary_name() {
        assert_eq!(Config::default().daemon_binary_name(), "gaiacli");
    }
}
