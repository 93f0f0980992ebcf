//! Button configuration for ha-multi-click
//!
//! This crate loads the YAML file describing which buttons to bridge,
//! validates it, and watches it for changes. The YAML loader understands
//! three custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR [default]` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use ha_config::{ConfigSource, ConfigWatcher};
//!
//! let source = ConfigSource::new("ha-multi-click.yaml");
//! let config = source.load()?;
//!
//! // Or keep reloading on every edit
//! let handle = ConfigWatcher::new(source).monitor(handler).await;
//! ```

mod error;
mod loader;
mod schema;
mod secrets;
mod source;
mod watcher;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use schema::{
    ActionVariant, ButtonSpec, Configuration, OffSpec, OnActions, OnSpec, TOKEN_ENV_VAR,
};
pub use secrets::{Secrets, SECRETS_FILE};
pub use source::ConfigSource;
pub use watcher::{
    ConfigWatcher, ReloadHandler, WatchHandle, DEFAULT_DEBOUNCE, DEFAULT_POLL_INTERVAL,
};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
