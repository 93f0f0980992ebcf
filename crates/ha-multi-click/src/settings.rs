//! Process settings from the environment

use anyhow::{Context, Result};
use ha_config::DEFAULT_POLL_INTERVAL;
use std::path::PathBuf;
use std::time::Duration;

/// Path of the button configuration
pub const CONFIG_ENV_VAR: &str = "HA_MULTI_CLICK_CONFIG";
/// Poll interval of the configuration watcher, in milliseconds
pub const POLL_ENV_VAR: &str = "HA_MULTI_CLICK_POLL_MS";
/// Debug logging for the bridge's own crates
pub const VERBOSE_ENV_VAR: &str = "HA_MULTI_CLICK_VERBOSE";

pub const DEFAULT_CONFIG_PATH: &str = "ha-multi-click.yaml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub config_path: PathBuf,
    pub poll_interval: Duration,
    pub verbose: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from any variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config_path = lookup(CONFIG_ENV_VAR)
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
            .into();

        let poll_interval = match lookup(POLL_ENV_VAR) {
            Some(ms) => {
                let ms: u64 = ms.trim().parse().with_context(|| {
                    format!("{} must be a number of milliseconds, got '{}'", POLL_ENV_VAR, ms)
                })?;
                Duration::from_millis(ms.max(1))
            }
            None => DEFAULT_POLL_INTERVAL,
        };

        let verbose = lookup(VERBOSE_ENV_VAR).is_some_and(|value| is_truthy(&value));

        Ok(Self {
            config_path,
            poll_interval,
            verbose,
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.config_path, PathBuf::from("ha-multi-click.yaml"));
        assert_eq!(settings.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(!settings.verbose);
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            (CONFIG_ENV_VAR, "/etc/ha-multi-click/buttons.yaml"),
            (POLL_ENV_VAR, "250"),
            (VERBOSE_ENV_VAR, "True"),
        ])
        .unwrap();
        assert_eq!(settings.config_path, PathBuf::from("/etc/ha-multi-click/buttons.yaml"));
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert!(settings.verbose);
    }

    #[test]
    fn test_bad_poll_interval() {
        let err = settings(&[(POLL_ENV_VAR, "soon")]).unwrap_err();
        assert!(err.to_string().contains(POLL_ENV_VAR));
    }
}
