//! WebSocket message types
//!
//! Only the slice of the Home Assistant WebSocket API this client speaks.

use ha_core::{Action, Trigger};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Outgoing Messages
// =============================================================================

/// Command sent once authenticated; serialized with its `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// Command payloads, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    CallService(Action),
    SubscribeTrigger {
        trigger: Trigger,
    },
    UnsubscribeEvents {
        subscription: u64,
    },
    FireEvent {
        event_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_data: Option<Value>,
    },
    Ping,
}

impl Request {
    /// The `type` field this request is sent with
    pub fn kind(&self) -> &'static str {
        match self {
            Request::CallService(_) => ha_core::CALL_SERVICE,
            Request::SubscribeTrigger { .. } => ha_core::SUBSCRIBE_TRIGGER,
            Request::UnsubscribeEvents { .. } => "unsubscribe_events",
            Request::FireEvent { .. } => "fire_event",
            Request::Ping => "ping",
        }
    }
}

/// First message after `auth_required`
#[derive(Debug, Serialize)]
pub struct AuthMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub access_token: &'a str,
}

impl<'a> AuthMessage<'a> {
    pub fn new(access_token: &'a str) -> Self {
        Self {
            msg_type: "auth",
            access_token,
        }
    }
}

// =============================================================================
// Incoming Messages
// =============================================================================

/// Message received from Home Assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: String,
    },
    Result {
        id: u64,
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<ErrorInfo>,
    },
    Event {
        id: u64,
        event: Value,
    },
    Pong {
        id: u64,
    },
}

impl IncomingMessage {
    /// Successful result for command `id`
    pub fn success(id: u64, result: Option<Value>) -> Self {
        IncomingMessage::Result {
            id,
            success: true,
            result,
            error: None,
        }
    }

    /// Failed result for command `id`
    pub fn failure(id: u64, code: &str, message: &str) -> Self {
        IncomingMessage::Result {
            id,
            success: false,
            result: None,
            error: Some(ErrorInfo {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// An event delivered to a trigger subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEvent {
    /// Stable key of the subscription (survives socket reconnects)
    pub subscription: u64,
    /// The `event` payload, usually `{"variables": {"trigger": ...}}`
    pub event: Value,
}
