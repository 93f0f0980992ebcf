//! Connection actor
//!
//! One task owns the transport, the pending command table and the
//! subscription routes. [`Connection`] handles talk to it over a channel, so
//! every state change is serialized through the actor.

use crate::error::{ClientError, ClientResult};
use crate::transport::{Connector, Transport, CHANNEL_CAPACITY};
use crate::types::{IncomingMessage, OutgoingMessage, Request, SubscriptionEvent};
use ha_core::{Action, Trigger};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

/// Stable identifier of a subscription, independent of wire ids
pub type SubscriptionKey = u64;

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A socket is up; `resumed` is set after an automatic reconnect
    Connected { resumed: bool },
    /// The socket dropped
    Disconnected,
    /// Automatic reconnection gave up
    ReconnectFailed(String),
}

/// Socket-level reconnection policy
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(5),
        }
    }
}

/// Options for [`Connection::open`]
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Reconnect by itself after a drop; `None` leaves recovery to the caller
    pub auto_reconnect: Option<ReconnectPolicy>,
}

impl ConnectionOptions {
    pub fn manual() -> Self {
        Self::default()
    }

    pub fn auto_reconnect(policy: ReconnectPolicy) -> Self {
        Self {
            auto_reconnect: Some(policy),
        }
    }
}

/// Options for [`Connection::subscribe`]
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    /// Re-register after an automatic reconnect instead of being dropped
    pub resubscribe: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { resubscribe: true }
    }
}

enum Command {
    Request {
        request: Request,
        reply: oneshot::Sender<ClientResult<Value>>,
    },
    Send {
        request: Request,
    },
    Subscribe {
        trigger: Trigger,
        resubscribe: bool,
        sink: mpsc::UnboundedSender<SubscriptionEvent>,
        reply: oneshot::Sender<ClientResult<SubscriptionKey>>,
    },
    Unsubscribe {
        key: SubscriptionKey,
        reply: oneshot::Sender<ClientResult<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a live connection
///
/// Cheap to clone. The actor stops when [`Connection::close`] is called or
/// every handle is dropped.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Connection {
    /// Connect once and start the actor
    pub async fn open<C: Connector>(
        connector: Arc<C>,
        options: ConnectionOptions,
    ) -> ClientResult<(Connection, broadcast::Receiver<ConnectionEvent>)> {
        let transport = connector.connect().await?;

        let (commands_tx, commands_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = broadcast::channel(16);

        let actor = Actor {
            connector,
            options,
            commands: commands_rx,
            events: events_tx.clone(),
            link: None,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
            wire_to_key: HashMap::new(),
            next_key: 1,
            retry: None,
        };
        tokio::spawn(actor.run(transport));

        Ok((
            Connection {
                commands: commands_tx,
                events: events_tx,
            },
            events_rx,
        ))
    }

    /// Another receiver for lifecycle events
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Send a command and wait for its result
    pub async fn request(&self, request: Request) -> ClientResult<Value> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Request { request, reply }).await?;
        rx.await.map_err(|_| ClientError::Cancelled)?
    }

    /// Queue a command without waiting; a failed result is logged
    pub async fn send(&self, request: Request) -> ClientResult<()> {
        self.command(Command::Send { request }).await
    }

    /// Call a service and wait for Home Assistant to acknowledge it
    pub async fn call_service(&self, action: Action) -> ClientResult<Value> {
        self.request(Request::CallService(action)).await
    }

    /// Fire an event on the bus
    pub async fn fire_event(&self, event_type: &str) -> ClientResult<()> {
        self.request(Request::FireEvent {
            event_type: event_type.to_string(),
            event_data: None,
        })
        .await
        .map(|_| ())
    }

    /// Round trip a ping
    pub async fn ping(&self) -> ClientResult<()> {
        self.request(Request::Ping).await.map(|_| ())
    }

    /// Subscribe to a trigger; events go to `sink`
    ///
    /// Several subscriptions may share one sink to keep their events in bus
    /// order.
    pub async fn subscribe(
        &self,
        trigger: Trigger,
        options: SubscribeOptions,
        sink: mpsc::UnboundedSender<SubscriptionEvent>,
    ) -> ClientResult<SubscriptionHandle> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Subscribe {
            trigger,
            resubscribe: options.resubscribe,
            sink,
            reply,
        })
        .await?;
        let key = rx.await.map_err(|_| ClientError::Cancelled)??;

        Ok(SubscriptionHandle {
            key,
            connection: self.clone(),
            released: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn unsubscribe(&self, key: SubscriptionKey) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        if self.command(Command::Unsubscribe { key, reply }).await.is_err() {
            // Actor gone: nothing left to route to
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Close the socket and stop the actor; later calls are no-ops
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn command(&self, command: Command) -> ClientResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Closed)
    }
}

/// A trigger subscription
///
/// Releasing is idempotent: the first successful [`unsubscribe`] removes
/// the route, later calls return immediately.
///
/// [`unsubscribe`]: SubscriptionHandle::unsubscribe
pub struct SubscriptionHandle {
    key: SubscriptionKey,
    connection: Connection,
    released: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Stop delivery and unsubscribe on the server
    pub async fn unsubscribe(&self) -> ClientResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.connection.unsubscribe(self.key).await;
        if result.is_err() {
            self.released.store(false, Ordering::SeqCst);
        }
        result
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("released", &self.is_released())
            .finish()
    }
}

// =============================================================================
// Actor
// =============================================================================

struct Link {
    outgoing: mpsc::Sender<OutgoingMessage>,
    incoming: mpsc::Receiver<IncomingMessage>,
    next_id: u64,
}

enum Pending {
    Request(oneshot::Sender<ClientResult<Value>>),
    Send(&'static str),
    Subscribe {
        key: SubscriptionKey,
        reply: oneshot::Sender<ClientResult<SubscriptionKey>>,
    },
    Resubscribe(SubscriptionKey),
    Unsubscribe(oneshot::Sender<ClientResult<()>>),
}

struct Subscription {
    trigger: Trigger,
    resubscribe: bool,
    sink: mpsc::UnboundedSender<SubscriptionEvent>,
    wire_id: Option<u64>,
}

struct Retry {
    attempt: u32,
    at: Instant,
}

struct Actor<C> {
    connector: Arc<C>,
    options: ConnectionOptions,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<ConnectionEvent>,
    link: Option<Link>,
    pending: HashMap<u64, Pending>,
    subscriptions: HashMap<SubscriptionKey, Subscription>,
    wire_to_key: HashMap<u64, SubscriptionKey>,
    next_key: SubscriptionKey,
    retry: Option<Retry>,
}

impl<C: Connector> Actor<C> {
    async fn run(mut self, transport: Transport) {
        self.attach(transport);
        let _ = self.events.send(ConnectionEvent::Connected { resumed: false });

        loop {
            let retry_at = self.retry.as_ref().map(|r| r.at);
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                message = next_message(&mut self.link) => match message {
                    Some(message) => self.handle_message(message),
                    None => self.on_disconnect(),
                },
                _ = wait_until(retry_at), if retry_at.is_some() => self.try_reconnect().await,
            }
        }

        debug!("Connection actor stopped");
    }

    fn attach(&mut self, transport: Transport) {
        self.link = Some(Link {
            outgoing: transport.outgoing,
            incoming: transport.incoming,
            next_id: 1,
        });
    }

    /// Queue a message on the current socket, returning its id
    fn transmit(&mut self, request: Request) -> ClientResult<u64> {
        let link = self.link.as_mut().ok_or(ClientError::Closed)?;
        let id = link.next_id;
        link.next_id += 1;

        trace!(id, kind = request.kind(), "Queueing command");
        link.outgoing
            .try_send(OutgoingMessage { id, request })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ClientError::Transport("outgoing queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => ClientError::Closed,
            })?;
        Ok(id)
    }

    /// Returns false once the connection is closed
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Request { request, reply } => match self.transmit(request) {
                Ok(id) => {
                    self.pending.insert(id, Pending::Request(reply));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::Send { request } => {
                let kind = request.kind();
                match self.transmit(request) {
                    Ok(id) => {
                        self.pending.insert(id, Pending::Send(kind));
                    }
                    Err(e) => warn!(error = %e, kind, "Dropping command"),
                }
            }
            Command::Subscribe {
                trigger,
                resubscribe,
                sink,
                reply,
            } => {
                let request = Request::SubscribeTrigger {
                    trigger: trigger.clone(),
                };
                match self.transmit(request) {
                    Ok(id) => {
                        let key = self.next_key;
                        self.next_key += 1;
                        self.subscriptions.insert(
                            key,
                            Subscription {
                                trigger,
                                resubscribe,
                                sink,
                                wire_id: Some(id),
                            },
                        );
                        self.wire_to_key.insert(id, key);
                        self.pending.insert(id, Pending::Subscribe { key, reply });
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Unsubscribe { key, reply } => {
                // Drop the route first so nothing more is delivered
                let Some(subscription) = self.subscriptions.remove(&key) else {
                    let _ = reply.send(Ok(()));
                    return true;
                };
                let Some(wire_id) = subscription.wire_id else {
                    let _ = reply.send(Ok(()));
                    return true;
                };
                self.wire_to_key.remove(&wire_id);

                match self.transmit(Request::UnsubscribeEvents {
                    subscription: wire_id,
                }) {
                    Ok(id) => {
                        self.pending.insert(id, Pending::Unsubscribe(reply));
                    }
                    // The socket is gone and the subscription with it
                    Err(_) => {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            Command::Close { reply } => {
                self.shutdown();
                self.commands.close();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn handle_message(&mut self, message: IncomingMessage) {
        match message {
            IncomingMessage::Event { id, event } => {
                let Some(key) = self.wire_to_key.get(&id).copied() else {
                    trace!(id, "Event for unknown subscription");
                    return;
                };
                if let Some(subscription) = self.subscriptions.get(&key) {
                    let delivered = subscription.sink.send(SubscriptionEvent {
                        subscription: key,
                        event,
                    });
                    if delivered.is_err() {
                        trace!(key, "Subscriber went away");
                    }
                }
            }
            IncomingMessage::Result {
                id,
                success,
                result,
                error,
            } => {
                let outcome = if success {
                    Ok(result.unwrap_or(Value::Null))
                } else {
                    let error = error.unwrap_or_else(|| crate::types::ErrorInfo {
                        code: "unknown_error".to_string(),
                        message: String::new(),
                    });
                    Err(ClientError::CommandFailed {
                        code: error.code,
                        message: error.message,
                    })
                };
                self.complete(id, outcome);
            }
            IncomingMessage::Pong { id } => self.complete(id, Ok(Value::Null)),
            other => debug!(?other, "Ignoring unexpected message"),
        }
    }

    fn complete(&mut self, id: u64, outcome: ClientResult<Value>) {
        let Some(pending) = self.pending.remove(&id) else {
            trace!(id, "Result for unknown command");
            return;
        };

        match pending {
            Pending::Request(reply) => {
                let _ = reply.send(outcome);
            }
            Pending::Send(kind) => {
                if let Err(e) = outcome {
                    warn!(error = %e, kind, "Command failed");
                }
            }
            Pending::Subscribe { key, reply } => match outcome {
                Ok(_) => {
                    let _ = reply.send(Ok(key));
                }
                Err(e) => {
                    self.subscriptions.remove(&key);
                    self.wire_to_key.remove(&id);
                    let _ = reply.send(Err(e));
                }
            },
            Pending::Resubscribe(key) => {
                if let Err(e) = outcome {
                    warn!(error = %e, key, "Resubscribe failed");
                    self.subscriptions.remove(&key);
                    self.wire_to_key.remove(&id);
                }
            }
            Pending::Unsubscribe(reply) => {
                let outcome = match outcome {
                    Err(ClientError::CommandFailed { code, .. }) if code == "not_found" => Ok(()),
                    other => other.map(|_| ()),
                };
                let _ = reply.send(outcome);
            }
        }
    }

    /// Answer everything in flight after the socket went away
    fn fail_pending(&mut self) {
        for (id, pending) in self.pending.drain() {
            match pending {
                Pending::Request(reply) => {
                    let _ = reply.send(Err(ClientError::Closed));
                }
                Pending::Subscribe { key, reply } => {
                    self.subscriptions.remove(&key);
                    let _ = reply.send(Err(ClientError::Closed));
                }
                Pending::Unsubscribe(reply) => {
                    let _ = reply.send(Ok(()));
                }
                Pending::Send(kind) => debug!(id, kind, "Command lost with connection"),
                Pending::Resubscribe(_) => {}
            }
        }
        self.wire_to_key.clear();
        for subscription in self.subscriptions.values_mut() {
            subscription.wire_id = None;
        }
    }

    fn on_disconnect(&mut self) {
        self.link = None;
        self.fail_pending();
        let _ = self.events.send(ConnectionEvent::Disconnected);

        match &self.options.auto_reconnect {
            Some(policy) => {
                info!(delay = ?policy.delay, "Disconnected, reconnecting");
                self.retry = Some(Retry {
                    attempt: 1,
                    at: Instant::now() + policy.delay,
                });
            }
            None => {
                info!("Disconnected");
                // Closing the sinks tells subscribers their routes are gone
                self.subscriptions.clear();
            }
        }
    }

    async fn try_reconnect(&mut self) {
        let Some(retry) = self.retry.take() else {
            return;
        };
        let Some(policy) = self.options.auto_reconnect.clone() else {
            return;
        };

        match self.connector.connect().await {
            Ok(transport) => {
                self.attach(transport);
                self.restore_subscriptions();
                info!(attempt = retry.attempt, "Reconnected");
                let _ = self.events.send(ConnectionEvent::Connected { resumed: true });
            }
            Err(e) if e.is_retryable() && retry.attempt < policy.max_attempts => {
                warn!(error = %e, attempt = retry.attempt, "Reconnect failed, retrying");
                self.retry = Some(Retry {
                    attempt: retry.attempt + 1,
                    at: Instant::now() + policy.delay,
                });
            }
            Err(e) => {
                error!(error = %e, attempts = retry.attempt, "Giving up reconnecting");
                self.subscriptions.clear();
                let _ = self.events.send(ConnectionEvent::ReconnectFailed(e.to_string()));
            }
        }
    }

    /// Re-issue resubscribing subscriptions on a fresh socket, drop the rest
    fn restore_subscriptions(&mut self) {
        self.subscriptions.retain(|key, subscription| {
            if !subscription.resubscribe {
                debug!(key, "Dropping non-resubscribing subscription");
            }
            subscription.resubscribe
        });

        let mut restore: Vec<(SubscriptionKey, Trigger)> = self
            .subscriptions
            .iter()
            .map(|(key, subscription)| (*key, subscription.trigger.clone()))
            .collect();
        restore.sort_by_key(|(key, _)| *key);

        for (key, trigger) in restore {
            match self.transmit(Request::SubscribeTrigger { trigger }) {
                Ok(id) => {
                    if let Some(subscription) = self.subscriptions.get_mut(&key) {
                        subscription.wire_id = Some(id);
                    }
                    self.wire_to_key.insert(id, key);
                    self.pending.insert(id, Pending::Resubscribe(key));
                }
                Err(e) => {
                    warn!(error = %e, key, "Resubscribe failed");
                    self.subscriptions.remove(&key);
                }
            }
        }
    }

    fn shutdown(&mut self) {
        self.link = None;
        self.retry = None;
        self.fail_pending();
        self.subscriptions.clear();
    }
}

async fn next_message(link: &mut Option<Link>) -> Option<IncomingMessage> {
    match link {
        Some(link) => link.incoming.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHub;
    use serde_json::json;

    async fn open(
        hub: &MockHub,
        options: ConnectionOptions,
    ) -> (Connection, broadcast::Receiver<ConnectionEvent>) {
        Connection::open(Arc::new(hub.clone()), options).await.unwrap()
    }

    fn press_trigger() -> Trigger {
        Trigger::device("mqtt", "dimmer", "action", "on-press")
    }

    #[tokio::test]
    async fn test_open_emits_connected() {
        let hub = MockHub::new();
        let (_connection, mut events) = open(&hub, ConnectionOptions::manual()).await;
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected { resumed: false });
        assert_eq!(hub.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_call_service_and_ping() {
        let hub = MockHub::new();
        let (connection, _events) = open(&hub, ConnectionOptions::manual()).await;

        let action = Action::new("light", "turn_off").with_target(json!({"device_id": "desk"}));
        connection.call_service(action.clone()).await.unwrap();
        connection.ping().await.unwrap();

        assert_eq!(hub.calls(), vec![action]);
    }

    #[tokio::test]
    async fn test_send_is_fire_and_forget() {
        let hub = MockHub::new();
        let (connection, _events) = open(&hub, ConnectionOptions::manual()).await;

        connection
            .send(Request::CallService(Action::new("scene", "turn_on")))
            .await
            .unwrap();
        connection.ping().await.unwrap();

        assert_eq!(hub.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_delivers_events() {
        let hub = MockHub::new();
        let (connection, _events) = open(&hub, ConnectionOptions::manual()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = connection
            .subscribe(press_trigger(), SubscribeOptions::default(), tx)
            .await
            .unwrap();
        assert_eq!(hub.active_subscriptions(), 1);

        assert_eq!(hub.press(&press_trigger()).await, 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.subscription, handle.key());
        assert_eq!(event.event["variables"]["trigger"]["subtype"], "on-press");
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = MockHub::new();
        let (connection, _events) = open(&hub, ConnectionOptions::manual()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = connection
            .subscribe(press_trigger(), SubscribeOptions::default(), tx)
            .await
            .unwrap();

        handle.unsubscribe().await.unwrap();
        assert!(handle.is_released());
        assert_eq!(hub.active_subscriptions(), 0);

        handle.unsubscribe().await.unwrap();
        assert_eq!(hub.press(&press_trigger()).await, 0);

        // The route and its sink are gone
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_after_close_is_noop() {
        let hub = MockHub::new();
        let (connection, _events) = open(&hub, ConnectionOptions::manual()).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let handle = connection
            .subscribe(press_trigger(), SubscribeOptions::default(), tx)
            .await
            .unwrap();
        connection.close().await;
        connection.close().await;

        assert!(connection.is_closed());
        handle.unsubscribe().await.unwrap();
        assert!(matches!(connection.ping().await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_failed_subscribe_is_reported() {
        let hub = MockHub::new();
        hub.reject_subscriptions(true);
        let (connection, _events) = open(&hub, ConnectionOptions::manual()).await;
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = connection
            .subscribe(press_trigger(), SubscribeOptions::default(), tx)
            .await;
        assert!(matches!(result, Err(ClientError::CommandFailed { .. })));
    }

    #[tokio::test]
    async fn test_manual_mode_drops_subscriptions_on_disconnect() {
        let hub = MockHub::new();
        let (connection, mut events) = open(&hub, ConnectionOptions::manual()).await;
        let _ = events.recv().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = connection
            .subscribe(press_trigger(), SubscribeOptions { resubscribe: true }, tx)
            .await
            .unwrap();

        hub.drop_connections();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert!(rx.recv().await.is_none());
        assert!(matches!(connection.ping().await, Err(ClientError::Closed)));
        assert_eq!(hub.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reconnect_restores_resubscribing_only() {
        let hub = MockHub::new();
        let policy = ReconnectPolicy {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        };
        let (connection, mut events) = open(&hub, ConnectionOptions::auto_reconnect(policy)).await;
        let _ = events.recv().await;

        let (kept_tx, mut kept_rx) = mpsc::unbounded_channel();
        let (dropped_tx, mut dropped_rx) = mpsc::unbounded_channel();
        let kept_trigger = press_trigger();
        let dropped_trigger = Trigger::event("other");
        let kept = connection
            .subscribe(kept_trigger.clone(), SubscribeOptions { resubscribe: true }, kept_tx)
            .await
            .unwrap();
        connection
            .subscribe(
                dropped_trigger.clone(),
                SubscribeOptions { resubscribe: false },
                dropped_tx,
            )
            .await
            .unwrap();

        hub.drop_connections();
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected { resumed: true });
        assert_eq!(hub.connect_count(), 2);

        // Let the resubscribe reach the hub
        connection.ping().await.unwrap();
        assert_eq!(hub.active_subscriptions(), 1);

        assert_eq!(hub.press(&kept_trigger).await, 1);
        assert_eq!(kept_rx.recv().await.unwrap().subscription, kept.key());
        assert!(dropped_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reconnect_gives_up() {
        let hub = MockHub::new();
        let policy = ReconnectPolicy {
            max_attempts: 2,
            delay: Duration::from_secs(1),
        };
        let (_connection, mut events) = open(&hub, ConnectionOptions::auto_reconnect(policy)).await;
        let _ = events.recv().await;

        hub.refuse_connections(true);
        hub.drop_connections();

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectionEvent::ReconnectFailed(_)
        ));
        assert_eq!(hub.connect_count(), 1);
    }
}
