//! Up/Down lifecycle of the bridge
//!
//! The [`Supervisor`] is the single owner of the live connection and the
//! button dispatchers. Everything that changes them (configuration updates,
//! connection events, the forced reconnect timer, shutdown) is handled in
//! one task, one message at a time.

use crate::dispatcher::{AttachOptions, ButtonDispatcher};
use async_trait::async_trait;
use futures::future::join_all;
use ha_config::{ConfigResult, Configuration, ReloadHandler};
use ha_template::TemplateEngine;
use ha_ws_client::{
    ClientError, ConnectMode, Connection, ConnectionEvent, ConnectionManager, ConnectionSettings,
    Connector,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Interval;
use tracing::{debug, error, info, warn};

/// Why the supervisor stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Asked to shut down
    Shutdown,
    /// The first configuration could not be loaded
    InvalidConfig(String),
    /// Home Assistant could not be reached again, or refused the token
    ConnectionLost(String),
}

impl ExitReason {
    /// Process exit status
    pub fn exit_code(&self) -> u8 {
        match self {
            ExitReason::Shutdown => 0,
            ExitReason::InvalidConfig(_) => 1,
            ExitReason::ConnectionLost(_) => 2,
        }
    }
}

/// Builds a connector for a configuration
pub type ConnectorFactory<C> = Box<dyn Fn(&Configuration) -> C + Send + Sync>;

enum Message {
    Update {
        update: ConfigResult<Configuration>,
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running [`Supervisor`]
///
/// Doubles as the [`ReloadHandler`] of the configuration watcher: an update
/// is only acknowledged once the supervisor has acted on it, which keeps
/// reloads single-flight.
#[derive(Clone)]
pub struct SupervisorHandle {
    messages: mpsc::Sender<Message>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl SupervisorHandle {
    /// Ask the supervisor to tear down and exit
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

#[async_trait]
impl ReloadHandler for SupervisorHandle {
    async fn on_change(&mut self, update: ConfigResult<Configuration>) {
        let (done, rx) = oneshot::channel();
        if self.messages.send(Message::Update { update, done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct Live {
    config: Arc<Configuration>,
    connection: Connection,
    events: broadcast::Receiver<ConnectionEvent>,
    dispatchers: Vec<ButtonDispatcher>,
    forced_reconnect: Interval,
}

enum State {
    Down,
    Up(Live),
}

enum Signal {
    Disconnected,
    ReconnectFailed(String),
    ForcedReconnect,
}

/// Owns the bridge's Up/Down state
pub struct Supervisor<C> {
    connector: ConnectorFactory<C>,
    settings: ConnectionSettings,
    engine: Arc<TemplateEngine>,
    messages: mpsc::Receiver<Message>,
    shutdown: watch::Receiver<bool>,
    state: State,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        connector: impl Fn(&Configuration) -> C + Send + Sync + 'static,
        engine: Arc<TemplateEngine>,
    ) -> (Self, SupervisorHandle) {
        let (messages_tx, messages_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Self {
            connector: Box::new(connector),
            settings: ConnectionSettings::default(),
            engine,
            messages: messages_rx,
            shutdown: shutdown_rx,
            state: State::Down,
        };
        let handle = SupervisorHandle {
            messages: messages_tx,
            shutdown: Arc::new(shutdown_tx),
        };
        (supervisor, handle)
    }

    pub fn with_settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run until shutdown or a fatal error
    pub async fn run(mut self) -> ExitReason {
        let reason = loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => {
                    info!("Shutting down");
                    break ExitReason::Shutdown;
                }
                message = self.messages.recv() => match message {
                    Some(Message::Update { update, done }) => {
                        let outcome = self.on_change(update).await;
                        let _ = done.send(());
                        if let Some(reason) = outcome {
                            break reason;
                        }
                    }
                    None => break ExitReason::Shutdown,
                },
                signal = next_signal(&mut self.state) => {
                    if let Some(reason) = self.on_signal(signal).await {
                        break reason;
                    }
                }
            }
        };

        self.tear_down().await;
        reason
    }

    async fn on_change(&mut self, update: ConfigResult<Configuration>) -> Option<ExitReason> {
        let config = match update {
            Ok(config) => Arc::new(config),
            Err(e) => {
                return match self.state {
                    State::Down => {
                        error!(error = %e, "Failed to load configuration");
                        Some(ExitReason::InvalidConfig(e.to_string()))
                    }
                    State::Up(_) => {
                        warn!(error = %e, "Failed to reload configuration, keeping the old one");
                        None
                    }
                };
            }
        };

        let mode = match self.state {
            State::Down => ConnectMode::Initial,
            State::Up(_) => {
                info!("Configuration changed, restarting");
                ConnectMode::Forced
            }
        };
        self.tear_down().await;
        self.bring_up(config, mode).await
    }

    async fn on_signal(&mut self, signal: Signal) -> Option<ExitReason> {
        let config = match &self.state {
            State::Up(live) => live.config.clone(),
            State::Down => return None,
        };

        match signal {
            Signal::Disconnected => {
                warn!("Disconnected from Home Assistant. Reconnecting...");
                self.tear_down().await;
                self.bring_up(config, ConnectMode::AfterDisconnect).await
            }
            Signal::ForcedReconnect => {
                info!("Recycling the connection");
                self.tear_down().await;
                self.bring_up(config, ConnectMode::Forced).await
            }
            Signal::ReconnectFailed(reason) => {
                error!(%reason, "Failed to reconnect to Home Assistant. Shutting down");
                Some(ExitReason::ConnectionLost(reason))
            }
        }
    }

    /// Connect, wait for the bus and attach every button
    async fn bring_up(
        &mut self,
        config: Arc<Configuration>,
        mut mode: ConnectMode,
    ) -> Option<ExitReason> {
        loop {
            let connector = (self.connector)(config.as_ref());
            let manager = ConnectionManager::new(connector).with_settings(self.settings.clone());

            let connected = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => {
                    info!("Shutting down");
                    return Some(ExitReason::Shutdown);
                }
                connected = manager.connect(mode) => connected,
            };

            let (connection, events) = match connected {
                Ok(connected) => connected,
                Err(e) => {
                    let verb = match mode {
                        ConnectMode::AfterDisconnect => "reconnect",
                        _ => "connect",
                    };
                    error!(error = %e, "Failed to {} to Home Assistant. Shutting down", verb);
                    return Some(ExitReason::ConnectionLost(e.to_string()));
                }
            };

            match attach_all(&config, &connection, &self.engine).await {
                Ok(dispatchers) => {
                    let url = &config.home_assistant_url;
                    match mode {
                        ConnectMode::AfterDisconnect => {
                            info!(url = %url, "Reconnected to Home Assistant")
                        }
                        _ => info!(url = %url, "Connected to Home Assistant"),
                    }
                    info!(buttons = dispatchers.len(), "Listening for button presses");

                    self.state = State::Up(Live {
                        config,
                        connection,
                        events,
                        dispatchers,
                        forced_reconnect: manager.forced_reconnect_ticker(),
                    });
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, "Connection failed while subscribing, reconnecting");
                    connection.close().await;
                    mode = ConnectMode::AfterDisconnect;
                }
            }
        }
    }

    /// Unsubscribe everything, then close the connection
    async fn tear_down(&mut self) {
        let State::Up(live) = std::mem::replace(&mut self.state, State::Down) else {
            return;
        };

        join_all(live.dispatchers.into_iter().map(|dispatcher| async move {
            let name = dispatcher.name().to_string();
            let cycle = dispatcher.detach().await;
            debug!(button = %name, count = cycle.count(), "Detached");
        }))
        .await;
        info!("Unsubscribed from all triggers.");

        live.connection.close().await;
    }
}

async fn attach_all(
    config: &Configuration,
    connection: &Connection,
    engine: &Arc<TemplateEngine>,
) -> Result<Vec<ButtonDispatcher>, ClientError> {
    let options = AttachOptions::manual(config.verbose);
    let mut dispatchers = Vec::with_capacity(config.buttons.len());

    for button in &config.buttons {
        match ButtonDispatcher::attach(button.clone(), connection, engine.clone(), options).await {
            Ok(dispatcher) => dispatchers.push(dispatcher),
            // Rejected trigger: reconnecting will not help, a reload might
            Err(ClientError::CommandFailed { code, message }) => {
                error!(
                    button = %button.name,
                    %code,
                    %message,
                    "Home Assistant rejected the button's trigger, skipping it"
                );
            }
            Err(e) => {
                join_all(dispatchers.into_iter().map(ButtonDispatcher::detach)).await;
                return Err(e);
            }
        }
    }
    Ok(dispatchers)
}

/// Resolves once shutdown was requested or every handle is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|requested| *requested).await;
}

/// Next thing that needs the supervisor's attention while Up
async fn next_signal(state: &mut State) -> Signal {
    let State::Up(live) = state else {
        return std::future::pending().await;
    };

    loop {
        tokio::select! {
            event = live.events.recv() => match event {
                Ok(ConnectionEvent::Disconnected) | Err(broadcast::error::RecvError::Closed) => {
                    return Signal::Disconnected;
                }
                Ok(ConnectionEvent::ReconnectFailed(reason)) => {
                    return Signal::ReconnectFailed(reason);
                }
                Ok(ConnectionEvent::Connected { resumed }) => {
                    debug!(resumed, "Connection event");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Missed connection events");
                }
            },
            _ = live.forced_reconnect.tick() => return Signal::ForcedReconnect,
        }
    }
}
