//! Action type for invoking Home Assistant services

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A service invocation dispatched when a button is pressed
///
/// Actions are opaque to the dispatcher: every field, including ones this
/// type does not model explicitly, is forwarded as the payload of a
/// `call_service` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// The domain the service belongs to (e.g., "light", "scene")
    pub domain: String,

    /// The service name (e.g., "turn_on", "turn_off", "toggle")
    pub service: String,

    /// Target selector (entity_id, device_id, area_id, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,

    /// Data passed to the service (e.g., brightness, transition)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_data: Option<Value>,

    /// Any other field, forwarded untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Action {
    /// Create an action without target or data
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            target: None,
            service_data: None,
            extra: Map::new(),
        }
    }

    /// Set the target selector
    pub fn with_target(mut self, target: Value) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the service data
    pub fn with_service_data(mut self, service_data: Value) -> Self {
        self.service_data = Some(service_data);
        self
    }

    /// Get the full service identifier (domain.service)
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}.{} {}", self.domain, self.service, target),
            None => write!(f, "{}.{}", self.domain, self.service),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_builder() {
        let action =
            Action::new("scene", "turn_on").with_target(json!({"entity_id": "scene.sofa"}));

        assert_eq!(action.domain, "scene");
        assert_eq!(action.service, "turn_on");
        assert_eq!(action.service_id(), "scene.turn_on");
        assert_eq!(action.target, Some(json!({"entity_id": "scene.sofa"})));
        assert!(action.service_data.is_none());
    }

    #[test]
    fn test_serialize_skips_missing_fields() {
        let action = Action::new("light", "turn_off");
        let value = serde_json::to_value(&action).unwrap();

        assert_eq!(value, json!({"domain": "light", "service": "turn_off"}));
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let value = json!({
            "domain": "light",
            "service": "turn_on",
            "target": {"device_id": "abc"},
            "service_data": {"brightness": 128},
            "return_response": false
        });

        let action: Action = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(action.extra.get("return_response"), Some(&json!(false)));
        assert_eq!(serde_json::to_value(&action).unwrap(), value);
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let yaml = "domain: scene\nservice: turn_on\ntarget:\n  entity_id: scene.buro_hell\n";
        let action: Action = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(action.service_id(), "scene.turn_on");
        assert_eq!(action.target, Some(json!({"entity_id": "scene.buro_hell"})));
    }

    #[test]
    fn test_display() {
        let action = Action::new("light", "turn_off").with_target(json!({"device_id": "d1"}));
        assert_eq!(action.to_string(), r#"light.turn_off {"device_id":"d1"}"#);
        assert_eq!(Action::new("scene", "turn_on").to_string(), "scene.turn_on");
    }
}
