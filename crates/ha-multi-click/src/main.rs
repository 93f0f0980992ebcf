//! ha-multi-click
//!
//! Bridges multi-function buttons to Home Assistant service calls.

use anyhow::Result;
use ha_config::{ConfigSource, ConfigWatcher, Configuration};
use ha_multi_click::{logging, signals, ExitReason, Settings, Supervisor};
use ha_template::TemplateEngine;
use ha_ws_client::WsConnector;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(reason) => ExitCode::from(reason.exit_code()),
        Err(e) => {
            eprintln!("ha-multi-click: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<ExitReason> {
    let settings = Settings::from_env()?;
    logging::init(settings.verbose)?;

    info!(config = %settings.config_path.display(), "Starting ha-multi-click");

    let engine = Arc::new(TemplateEngine::new());
    let source = ConfigSource::with_engine(&settings.config_path, engine.clone());

    let connector = |config: &Configuration| {
        WsConnector::new(&config.home_assistant_url, &config.long_lived_token)
    };
    let (supervisor, handle) = Supervisor::new(connector, engine);
    let supervisor = tokio::spawn(supervisor.run());

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        match signals::wait_for_shutdown_signal().await {
            Ok(()) => {
                info!("Received shutdown signal");
                signal_handle.shutdown();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signals"),
        }
    });

    // Returns once the first configuration has been acted on
    let watch = ConfigWatcher::new(source)
        .with_poll_interval(settings.poll_interval)
        .monitor(handle)
        .await;

    let reason = supervisor.await?;
    watch.stop().await;

    info!(?reason, "Stopped");
    Ok(reason)
}
