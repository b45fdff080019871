//! Configuration resolution from file and environment

use crate::config::{default_root, Config, ConfigError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "VOYAGER_CONFIG";

/// Partial configuration as written in a TOML file
///
/// Every key is optional; missing keys keep their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// See [`Config::node_lcd`]
    pub node_lcd: Option<String>,
    /// See [`Config::node_rpc`]
    pub node_rpc: Option<String>,
    /// See [`Config::lcd_port`]
    pub lcd_port: Option<u16>,
    /// See [`Config::lcd_port_prod`]
    pub lcd_port_prod: Option<u16>,
    /// See [`Config::development`]
    pub development: Option<bool>,
    /// See [`Config::mocked`]
    pub mocked: Option<bool>,
    /// See [`Config::logging`]
    pub logging: Option<bool>,
    /// See [`Config::binary_path`]
    pub binary_path: Option<PathBuf>,
    /// See [`Config::network`]
    pub network: Option<String>,
    /// See [`Config::network_path`]
    pub network_path: Option<PathBuf>,
    /// See [`Config::root`]
    pub root: Option<PathBuf>,
    /// See [`Config::resources_dir`]
    pub resources_dir: Option<PathBuf>,
    /// See [`Config::sentry_dsn`]
    pub sentry_dsn: Option<String>,
}

impl ConfigFile {
    /// Read and parse a TOML config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

impl Config {
    /// Resolve configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration with an explicit config file path
    ///
    /// The file takes the place of `VOYAGER_CONFIG`; environment overrides
    /// still apply on top.
    pub fn from_env_with_file(path: &Path) -> Result<Self, ConfigError> {
        let file = ConfigFile::load(path)?;
        Self::resolve(Some(file), |key| std::env::var(key).ok())
    }

    /// Resolve configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match lookup(CONFIG_PATH_ENV) {
            Some(path) if !path.is_empty() => Some(ConfigFile::load(Path::new(&path))?),
            _ => None,
        };
        Self::resolve(file, lookup)
    }

    fn resolve<F>(file: Option<ConfigFile>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let mut explicit_root = None;
        let mut explicit_network_path = None;

        if let Some(file) = file {
            debug!("Applying config file overrides");
            if let Some(v) = file.node_lcd {
                config.node_lcd = v;
            }
            if let Some(v) = file.node_rpc {
                config.node_rpc = v;
            }
            if let Some(v) = file.lcd_port {
                config.lcd_port = v;
            }
            if let Some(v) = file.lcd_port_prod {
                config.lcd_port_prod = v;
            }
            if let Some(v) = file.development {
                config.development = v;
            }
            if let Some(v) = file.mocked {
                config.mocked = v;
            }
            if let Some(v) = file.logging {
                config.logging = v;
            }
            if let Some(v) = file.binary_path {
                config.binary_path = Some(v);
            }
            if let Some(v) = file.network {
                config.network = v;
            }
            if let Some(v) = file.resources_dir {
                config.resources_dir = v;
            }
            if let Some(v) = file.sentry_dsn {
                config.sentry_dsn = v;
            }
            explicit_root = file.root;
            explicit_network_path = file.network_path;
        }

        if let Some(v) = lookup("LCD_URL") {
            config.node_lcd = v;
        }
        if let Some(v) = lookup("RPC_URL") {
            config.node_rpc = v;
        }
        if let Some(v) = lookup("NODE_ENV") {
            config.development = matches!(v.as_str(), "development" | "testing");
        }
        if let Some(v) = lookup("COSMOS_MOCKED") {
            config.mocked = parse_strict_bool("COSMOS_MOCKED", &v)?;
        }
        if let Some(v) = lookup("LOGGING") {
            config.logging = parse_enabled_flag("LOGGING", &v)?;
        }
        if let Some(v) = lookup("BINARY_PATH") {
            if !v.is_empty() {
                config.binary_path = Some(PathBuf::from(v));
            }
        }
        if let Some(v) = lookup("VOYAGER_RESOURCES") {
            config.resources_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SENTRY_DSN") {
            config.sentry_dsn = v;
        }
        if let Some(v) = lookup("VOYAGER_APP_VERSION") {
            config.app_version = v;
        }
        if let Some(v) = lookup("COSMOS_NETWORK") {
            explicit_network_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("COSMOS_HOME") {
            explicit_root = Some(PathBuf::from(v));
        }

        // Paths derived from other fields are computed last so they see the final values
        config.network_path = explicit_network_path.unwrap_or_else(|| {
            config
                .resources_dir
                .join("networks")
                .join(&config.network)
        });
        config.root =
            explicit_root.unwrap_or_else(|| default_root(&config.network, config.development));

        Ok(config)
    }
}

/// `true`/`false` only
fn parse_strict_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    serde_json::from_str::<bool>(value.trim()).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Any JSON value enables the flag except a literal `false`
fn parse_enabled_flag(field: &str, value: &str) -> Result<bool, ConfigError> {
    match serde_json::from_str::<serde_json::Value>(value.trim()) {
        Ok(serde_json::Value::Bool(false)) => Ok(false),
        Ok(_) => Ok(true),
        Err(_) => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.node_lcd, "http://localhost:1317");
        assert!(config.logging);
        assert!(!config.mocked);
        assert!(config.binary_path.is_none());
        assert!(config.network_path.ends_with("networks/gaia-6002"));
    }

    #[test]
    fn test_env_overrides_urls_and_paths() {
        let config = Config::from_lookup(lookup_from(&[
            ("LCD_URL", "https://lcd.example.com"),
            ("RPC_URL", "https://rpc.example.com:26657"),
            ("BINARY_PATH", "/opt/gaia/gaiacli"),
            ("COSMOS_HOME", "/tmp/voyager-home"),
            ("COSMOS_NETWORK", "/tmp/networks/gaia-7001"),
        ]))
        .unwrap();

        assert_eq!(config.node_lcd, "https://lcd.example.com");
        assert_eq!(config.node_rpc, "https://rpc.example.com:26657");
        assert_eq!(config.binary_path, Some(PathBuf::from("/opt/gaia/gaiacli")));
        assert_eq!(config.root, PathBuf::from("/tmp/voyager-home"));
        assert_eq!(config.network_path, PathBuf::from("/tmp/networks/gaia-7001"));
    }

    #[test]
    fn test_node_env_sets_development() {
        let config = Config::from_lookup(lookup_from(&[("NODE_ENV", "testing")])).unwrap();
        assert!(config.development);
        assert!(config.root.ends_with(".cosmos-voyager-dev/gaia-6002"));

        let config = Config::from_lookup(lookup_from(&[("NODE_ENV", "production")])).unwrap();
        assert!(!config.development);
    }

    #[test]
    fn test_logging_only_disabled_by_literal_false() {
        let off = Config::from_lookup(lookup_from(&[("LOGGING", "false")])).unwrap();
        assert!(!off.logging);
        let on = Config::from_lookup(lookup_from(&[("LOGGING", "0")])).unwrap();
        assert!(on.logging);
        let bad = Config::from_lookup(lookup_from(&[("LOGGING", "nope")]));
        assert!(matches!(bad, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_mocked_requires_boolean() {
        let config = Config::from_lookup(lookup_from(&[("COSMOS_MOCKED", "true")])).unwrap();
        assert!(config.mocked);
        let err = Config::from_lookup(lookup_from(&[("COSMOS_MOCKED", "yes")])).unwrap_err();
        assert!(err.to_string().contains("COSMOS_MOCKED"));
    }

    #[test]
    fn test_config_file_then_env() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("voyager.toml");
        std::fs::write(
            &path,
            r#"
node_lcd = "http://file-lcd:1317"
node_rpc = "http://file-rpc:26657"
lcd_port_prod = 9999
network = "gaia-8000"
"#,
        )
        .unwrap();

        let config = Config::from_lookup(lookup_from(&[
            (CONFIG_PATH_ENV, path.to_str().unwrap()),
            ("RPC_URL", "http://env-rpc:26657"),
        ]))
        .unwrap();

        assert_eq!(config.node_lcd, "http://file-lcd:1317");
        assert_eq!(config.node_rpc, "http://env-rpc:26657");
        assert_eq!(config.lcd_port_prod, 9999);
        assert!(config.network_path.ends_with("networks/gaia-8000"));
        assert!(config.root.ends_with("gaia-8000"));
    }

    #[test]
    fn test_unknown_file_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("voyager.toml");
        std::fs::write(&path, "nodes = []\n").unwrap();

        let err = ConfigFile::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = Config::from_lookup(lookup_from(&[(CONFIG_PATH_ENV, "/nonexistent/voyager.toml")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
