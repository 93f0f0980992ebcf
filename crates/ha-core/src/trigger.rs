//! Trigger definitions passed to `subscribe_trigger`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Trigger definition
///
/// Only the two platforms a button needs are modelled. Everything else in
/// the mapping is kept in `extra` and sent back to Home Assistant as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires on a device automation event (e.g. a remote button press)
    Device(DeviceTrigger),

    /// Fires on any event with optional data matching
    Event(EventTrigger),
}

impl Trigger {
    /// Create an event trigger for the given event type
    pub fn event(event_type: impl Into<String>) -> Self {
        Trigger::Event(EventTrigger {
            event_type: event_type.into(),
            event_data: None,
            extra: Map::new(),
        })
    }

    /// Create a device trigger
    pub fn device(
        domain: impl Into<String>,
        device_id: impl Into<String>,
        kind: impl Into<String>,
        subtype: impl Into<String>,
    ) -> Self {
        Trigger::Device(DeviceTrigger {
            domain: domain.into(),
            device_id: device_id.into(),
            kind: Some(kind.into()),
            subtype: Some(subtype.into()),
            extra: Map::new(),
        })
    }

    /// Get the trigger platform name
    pub fn platform(&self) -> &'static str {
        match self {
            Trigger::Device(_) => "device",
            Trigger::Event(_) => "event",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Device(t) => {
                write!(f, "device({}/{}", t.domain, t.device_id)?;
                if let Some(subtype) = &t.subtype {
                    write!(f, ":{}", subtype)?;
                }
                f.write_str(")")
            }
            Trigger::Event(t) => write!(f, "event({})", t.event_type),
        }
    }
}

/// Device trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTrigger {
    /// Integration domain providing the device (e.g. "mqtt", "zha")
    pub domain: String,

    /// Device registry ID
    pub device_id: String,

    /// Trigger type (integration-specific, e.g. "action")
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Trigger subtype (e.g. "on-press")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,

    /// Additional integration-specific fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Event trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    /// Event type to match
    pub event_type: String,

    /// Optional event data to match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Value>,

    /// Additional fields (context filters, ids, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
