//! In-memory Home Assistant for tests
//!
//! [`MockHub`] is a [`Connector`] whose sockets are channel pairs. It
//! records service calls, answers subscriptions and delivers events for
//! button presses and fired events, and can be told to misbehave: refuse
//! connections, reject the token, sit on fired events or drop every socket.

use crate::error::{ClientError, ClientResult};
use crate::transport::{Connector, Transport, CHANNEL_CAPACITY};
use crate::types::{IncomingMessage, OutgoingMessage, Request};
use async_trait::async_trait;
use ha_core::{Action, Trigger};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type Delivery = (mpsc::Sender<IncomingMessage>, IncomingMessage);

/// Fake Home Assistant; clones share state
#[derive(Clone)]
pub struct MockHub {
    state: Arc<Mutex<HubState>>,
}

struct HubState {
    attempts: usize,
    connects: usize,
    refuse: bool,
    reject_auth: bool,
    reject_subscriptions: bool,
    rejected_triggers: Vec<Trigger>,
    ready: bool,
    swallow_fires: usize,
    calls: Vec<Action>,
    fired: Vec<String>,
    sessions: HashMap<u64, Session>,
    next_session: u64,
}

struct Session {
    tx: mpsc::Sender<IncomingMessage>,
    subscriptions: HashMap<u64, Trigger>,
}

impl Default for MockHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                attempts: 0,
                connects: 0,
                refuse: false,
                reject_auth: false,
                reject_subscriptions: false,
                rejected_triggers: Vec::new(),
                ready: true,
                swallow_fires: 0,
                calls: Vec::new(),
                fired: Vec::new(),
                sessions: HashMap::new(),
                next_session: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- controls --

    /// While not ready, fired events are acknowledged but never dispatched
    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    /// Acknowledge but do not dispatch the next `n` fired events
    pub fn swallow_next_fires(&self, n: usize) {
        self.lock().swallow_fires = n;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    pub fn reject_auth(&self, reject: bool) {
        self.lock().reject_auth = reject;
    }

    pub fn reject_subscriptions(&self, reject: bool) {
        self.lock().reject_subscriptions = reject;
    }

    /// Answer subscriptions to `trigger` with an error, as for an unknown device
    pub fn reject_trigger(&self, trigger: &Trigger) {
        self.lock().rejected_triggers.push(trigger.clone());
    }

    /// Drop every open socket, as a restarting server would
    pub fn drop_connections(&self) {
        self.lock().sessions.clear();
    }

    // -- queries --

    /// Successful connections so far
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Connection attempts, including refused ones
    pub fn connect_attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Service calls received, in order
    pub fn calls(&self) -> Vec<Action> {
        self.lock().calls.clone()
    }

    pub fn fired_events(&self) -> Vec<String> {
        self.lock().fired.clone()
    }

    /// Live trigger subscriptions across all sockets
    pub fn active_subscriptions(&self) -> usize {
        self.lock()
            .sessions
            .values()
            .map(|s| s.subscriptions.len())
            .sum()
    }

    /// Fire `trigger` as if the device was used; returns how many
    /// subscriptions it was delivered to
    pub async fn press(&self, trigger: &Trigger) -> usize {
        let deliveries = {
            let state = self.lock();
            state.deliveries(|t| t == trigger)
        };
        deliver(deliveries).await
    }

    fn handle(&self, session_id: u64, message: OutgoingMessage) -> Option<Vec<Delivery>> {
        let mut state = self.lock();
        let tx = state.sessions.get(&session_id)?.tx.clone();
        let id = message.id;

        let mut out = Vec::new();
        match message.request {
            Request::CallService(action) => {
                state.calls.push(action);
                out.push((tx, IncomingMessage::success(id, Some(json!({"context": {}})))));
            }
            Request::SubscribeTrigger { trigger } => {
                if state.reject_subscriptions || state.rejected_triggers.contains(&trigger) {
                    out.push((
                        tx,
                        IncomingMessage::failure(id, "invalid_format", "Invalid trigger"),
                    ));
                } else {
                    if let Some(session) = state.sessions.get_mut(&session_id) {
                        session.subscriptions.insert(id, trigger);
                    }
                    out.push((tx, IncomingMessage::success(id, None)));
                }
            }
            Request::UnsubscribeEvents { subscription } => {
                let removed = state
                    .sessions
                    .get_mut(&session_id)
                    .and_then(|s| s.subscriptions.remove(&subscription));
                let reply = match removed {
                    Some(_) => IncomingMessage::success(id, None),
                    None => IncomingMessage::failure(id, "not_found", "Subscription not found."),
                };
                out.push((tx, reply));
            }
            Request::FireEvent { event_type, .. } => {
                state.fired.push(event_type.clone());
                out.push((tx, IncomingMessage::success(id, Some(json!({"context": {}})))));

                if state.swallow_fires > 0 {
                    state.swallow_fires -= 1;
                } else if state.ready {
                    out.extend(state.deliveries(|t| {
                        matches!(t, Trigger::Event(e) if e.event_type == event_type)
                    }));
                }
            }
            Request::Ping => out.push((tx, IncomingMessage::Pong { id })),
        }
        Some(out)
    }
}

impl HubState {
    fn deliveries(&self, matches: impl Fn(&Trigger) -> bool) -> Vec<Delivery> {
        let mut out = Vec::new();
        for session in self.sessions.values() {
            for (wire_id, trigger) in &session.subscriptions {
                if matches(trigger) {
                    out.push((
                        session.tx.clone(),
                        IncomingMessage::Event {
                            id: *wire_id,
                            event: trigger_event(trigger),
                        },
                    ));
                }
            }
        }
        out
    }
}

/// The payload `subscribe_trigger` delivers
fn trigger_event(trigger: &Trigger) -> Value {
    let mut variables = serde_json::to_value(trigger).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut variables {
        map.insert("platform".to_string(), json!(trigger.platform()));
    }
    json!({"variables": {"trigger": variables}, "context": null})
}

async fn deliver(deliveries: Vec<Delivery>) -> usize {
    let mut delivered = 0;
    for (tx, message) in deliveries {
        let is_event = matches!(message, IncomingMessage::Event { .. });
        if tx.send(message).await.is_ok() && is_event {
            delivered += 1;
        }
    }
    delivered
}

#[async_trait]
impl Connector for MockHub {
    async fn connect(&self) -> ClientResult<Transport> {
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<OutgoingMessage>(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let session_id = {
            let mut state = self.lock();
            state.attempts += 1;
            if state.refuse {
                return Err(ClientError::Transport("connection refused".to_string()));
            }
            if state.reject_auth {
                return Err(ClientError::AuthInvalid("Invalid access token".to_string()));
            }
            state.connects += 1;
            let session_id = state.next_session;
            state.next_session += 1;
            state.sessions.insert(
                session_id,
                Session {
                    tx: incoming_tx,
                    subscriptions: HashMap::new(),
                },
            );
            session_id
        };

        // The session owns the only long-lived sender, so dropping it from
        // the map ends the client's incoming stream
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                match hub.handle(session_id, message) {
                    Some(deliveries) => {
                        deliver(deliveries).await;
                    }
                    None => break,
                }
            }
            hub.lock().sessions.remove(&session_id);
        });

        Ok(Transport {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}
