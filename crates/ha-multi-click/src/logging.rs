//! Tracing setup for the binary

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

const QUIET: &str = "info";
const VERBOSE: &str = "info,ha_multi_click=debug,ha_ws_client=debug,ha_config=debug";

/// Filter used when `RUST_LOG` is not set
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE
    } else {
        QUIET
    }
}

/// Install the global fmt subscriber; `RUST_LOG` takes precedence
pub fn init(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        for verbose in [false, true] {
            assert!(EnvFilter::try_new(default_directives(verbose)).is_ok());
        }
    }
}
