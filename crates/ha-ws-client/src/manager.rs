//! Connection lifecycle
//!
//! [`ConnectionManager`] turns a [`Connector`] into a connection that is
//! known to be useful: it retries until a socket opens, then proves the
//! event bus dispatches by round-tripping a private probe event before
//! handing the connection out.

use crate::connection::{Connection, ConnectionEvent, ConnectionOptions, SubscribeOptions};
use crate::error::{ClientError, ClientResult};
use crate::transport::Connector;
use ha_core::Trigger;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Timings of the connect and probe loops
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Pause between failed connection attempts
    pub retry_delay: Duration,
    /// How long the probe waits for its own event
    pub probe_timeout: Duration,
    /// Extra settle time once ready after a disconnect
    pub reconnect_grace: Duration,
    /// Period of the forced full reconnect
    pub forced_reconnect_interval: Duration,
    /// Attempts after a disconnect before giving up; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    /// Private event type used by the readiness probe
    pub probe_event_type: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            reconnect_grace: Duration::from_secs(30),
            forced_reconnect_interval: Duration::from_secs(600),
            max_reconnect_attempts: Some(60),
            probe_event_type: format!(
                "ha_multi_click_probe_{}",
                Ulid::new().to_string().to_lowercase()
            ),
        }
    }
}

/// Why a connection is being opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// First connection of the process; retried forever
    Initial,
    /// Coming back from a drop; bounded, followed by the grace delay
    AfterDisconnect,
    /// Scheduled recycle of a healthy connection; retried forever
    Forced,
}

/// Opens ready connections
pub struct ConnectionManager<C> {
    connector: Arc<C>,
    settings: ConnectionSettings,
    options: ConnectionOptions,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            settings: ConnectionSettings::default(),
            options: ConnectionOptions::manual(),
        }
    }

    pub fn with_settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Connect and wait until the event bus is dispatching
    ///
    /// Transport failures and probe timeouts are retried every
    /// `retry_delay`. A rejected token ends the loop, as does running out of
    /// attempts in [`ConnectMode::AfterDisconnect`].
    pub async fn connect(
        &self,
        mode: ConnectMode,
    ) -> ClientResult<(Connection, broadcast::Receiver<ConnectionEvent>)> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let opened = Connection::open(self.connector.clone(), self.options.clone()).await;
            let error = match opened {
                Ok((connection, events)) => match self.wait_until_ready(&connection).await {
                    Ok(()) => {
                        let grace = self.settings.reconnect_grace;
                        if mode == ConnectMode::AfterDisconnect && !grace.is_zero() {
                            info!(?grace, "Event bus ready, waiting before subscribing");
                            sleep(grace).await;
                        }
                        debug!(attempt, ?mode, "Connection ready");
                        return Ok((connection, events));
                    }
                    Err(e) => {
                        connection.close().await;
                        e
                    }
                },
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if mode == ConnectMode::AfterDisconnect {
                if let Some(max) = self.settings.max_reconnect_attempts {
                    if attempt >= max {
                        warn!(error = %error, attempt, "Giving up reconnecting");
                        return Err(ClientError::ReconnectExhausted { attempts: attempt });
                    }
                }
            }

            warn!(
                error = %error,
                attempt,
                retry_in = ?self.settings.retry_delay,
                "Failed to connect to Home Assistant, retrying"
            );
            sleep(self.settings.retry_delay).await;
        }
    }

    /// Repeat the probe until it succeeds; only probe timeouts are retried
    async fn wait_until_ready(&self, connection: &Connection) -> ClientResult<()> {
        loop {
            match self.probe(connection).await {
                Ok(()) => return Ok(()),
                Err(ClientError::ReadinessTimeout) => {
                    warn!(
                        timeout = ?self.settings.probe_timeout,
                        "Event bus did not dispatch the probe event, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Subscribe to the probe event, fire it and wait for it to come back
    async fn probe(&self, connection: &Connection) -> ClientResult<()> {
        let event_type = &self.settings.probe_event_type;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = connection
            .subscribe(
                Trigger::event(event_type.as_str()),
                SubscribeOptions { resubscribe: false },
                tx,
            )
            .await?;

        let outcome = async {
            connection.fire_event(event_type).await?;
            match timeout(self.settings.probe_timeout, rx.recv()).await {
                Ok(Some(_)) => Ok(()),
                Ok(None) => Err(ClientError::Closed),
                Err(_) => Err(ClientError::ReadinessTimeout),
            }
        }
        .await;

        if let Err(e) = handle.unsubscribe().await {
            debug!(error = %e, "Failed to remove probe subscription");
        }
        outcome
    }

    /// Interval whose first tick is one period from now
    pub fn forced_reconnect_ticker(&self) -> Interval {
        let period = self.settings.forced_reconnect_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHub;

    fn manager(hub: &MockHub) -> ConnectionManager<MockHub> {
        ConnectionManager::new(hub.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_when_ready() {
        let hub = MockHub::new();
        let manager = manager(&hub);
        let start = Instant::now();

        let (connection, _events) = manager.connect(ConnectMode::Initial).await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(hub.fired_events(), vec![manager.settings().probe_event_type.clone()]);
        // The probe cleans up after itself
        assert_eq!(hub.active_subscriptions(), 0);
        connection.ping().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_retries_after_timeout() {
        let hub = MockHub::new();
        hub.swallow_next_fires(1);
        let manager = manager(&hub);
        let start = Instant::now();

        manager.connect(ConnectMode::Initial).await.unwrap();

        assert_eq!(hub.fired_events().len(), 2);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(hub.connect_count(), 1);
        assert_eq!(hub.active_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_waits_for_bus() {
        let hub = MockHub::new();
        hub.set_ready(false);
        let manager = manager(&hub);

        let task =
            tokio::spawn(async move { manager.connect(ConnectMode::Initial).await.map(|_| ()) });
        sleep(Duration::from_secs(7)).await;
        assert!(!task.is_finished());
        hub.set_ready(true);

        task.await.unwrap().unwrap();
        assert!(hub.fired_events().len() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_forever_initially() {
        let hub = MockHub::new();
        hub.refuse_connections(true);
        let manager = manager(&hub);

        let task =
            tokio::spawn(async move { manager.connect(ConnectMode::Initial).await.map(|_| ()) });
        sleep(Duration::from_secs(12)).await;
        assert_eq!(hub.connect_attempts(), 3);
        hub.refuse_connections(false);

        task.await.unwrap().unwrap();
        assert_eq!(hub.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_token_is_fatal() {
        let hub = MockHub::new();
        hub.reject_auth(true);

        let result = manager(&hub).connect(ConnectMode::Initial).await;
        assert!(matches!(result, Err(ClientError::AuthInvalid(_))));
        assert_eq!(hub.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_delay_after_disconnect() {
        let hub = MockHub::new();
        let manager = manager(&hub);

        let start = Instant::now();
        manager.connect(ConnectMode::AfterDisconnect).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));

        let start = Instant::now();
        manager.connect(ConnectMode::Forced).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up() {
        let hub = MockHub::new();
        hub.refuse_connections(true);
        let manager = manager(&hub).with_settings(ConnectionSettings {
            max_reconnect_attempts: Some(3),
            ..ConnectionSettings::default()
        });

        let result = manager.connect(ConnectMode::AfterDisconnect).await;
        assert!(matches!(result, Err(ClientError::ReconnectExhausted { attempts: 3 })));
        assert_eq!(hub.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_reconnect_ticker() {
        let hub = MockHub::new();
        let manager = manager(&hub);
        let start = Instant::now();

        let mut ticker = manager.forced_reconnect_ticker();
        ticker.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(600));
    }
}
