//! # Voyager Configuration
//!
//! Process-wide settings for the lite-client supervisor, resolved once at
//! startup and read-only afterwards.
//!
//! Resolution order:
//! 1. Built-in defaults
//! 2. Optional TOML file (`VOYAGER_CONFIG` or an explicit path)
//! 3. Environment overrides (`LCD_URL`, `RPC_URL`, `BINARY_PATH`, ...)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voyager_config::Config;
//!
//! let config = Config::from_env()?;
//! println!("daemon REST port: {}", config.active_lcd_port());
//! # Ok::<(), voyager_config::ConfigError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod loader;

pub use config::*;
pub use loader::*;
