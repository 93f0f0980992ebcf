//! Button configuration schema
//!
//! Parses and validates the document produced by the YAML loader.

use ha_core::{Action, Trigger};
use ha_template::{TemplateEngine, TemplateResult, When};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{ConfigError, ConfigResult};

/// Environment variable consulted when the file carries no token
pub const TOKEN_ENV_VAR: &str = "HA_TOKEN";

/// Top-level configuration
///
/// Immutable once loaded; a reload produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Base URL of the Home Assistant instance (`http(s)://` or `ws(s)://`)
    pub home_assistant_url: String,

    /// Long-lived access token; falls back to `$HA_TOKEN` when empty
    #[serde(default, skip_serializing)]
    pub long_lived_token: String,

    /// Buttons to bridge
    pub buttons: Vec<ButtonSpec>,

    /// Log every press at info level
    #[serde(default, deserialize_with = "flexible_bool")]
    pub verbose: bool,

    /// Files this configuration was assembled from
    #[serde(skip)]
    pub sources: Vec<PathBuf>,
}

/// One physical button with an "on" and an "off" trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonSpec {
    /// Display name used in logs; defaults to `button <n>`
    #[serde(default)]
    pub name: String,

    pub off: OffSpec,

    pub on: OnSpec,
}

/// "off" side of a button: fixed action, resets the cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffSpec {
    pub trigger: Trigger,
    pub action: Action,
}

/// "on" side of a button: cycles through actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnSpec {
    pub trigger: Trigger,
    pub actions: OnActions,
}

/// Actions for the "on" trigger
///
/// Either one fixed list, or variants whose `when` guard is evaluated on
/// every press. The first variant that holds supplies the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OnActions {
    Static(Vec<Action>),
    Dynamic(Vec<ActionVariant>),
}

/// A guarded action list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionVariant {
    /// Guard; a variant without one always matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<When>,

    pub actions: Vec<Action>,
}

impl OnActions {
    /// Produce the action list for the current press
    ///
    /// Returns an empty slice when no variant matches.
    pub fn resolve(&self, engine: &TemplateEngine) -> TemplateResult<&[Action]> {
        match self {
            OnActions::Static(actions) => Ok(actions.as_slice()),
            OnActions::Dynamic(variants) => {
                for variant in variants {
                    let matches = match &variant.when {
                        Some(when) => when.evaluate(engine)?,
                        None => true,
                    };
                    if matches {
                        return Ok(variant.actions.as_slice());
                    }
                }
                Ok(&[][..])
            }
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, OnActions::Dynamic(_))
    }
}

impl Configuration {
    /// Fill in defaults and check the configuration is usable
    ///
    /// `token_from_env` is consulted only when the file has no token.
    pub fn validate(
        &mut self,
        engine: &TemplateEngine,
        token_from_env: Option<String>,
    ) -> ConfigResult<()> {
        let url = self.home_assistant_url.trim().trim_end_matches('/').to_string();
        if !["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(ConfigError::InvalidValue {
                key: "home_assistant_url".to_string(),
                reason: format!("'{}' must start with http(s):// or ws(s)://", url),
            });
        }
        self.home_assistant_url = url;

        if self.long_lived_token.trim().is_empty() {
            self.long_lived_token = token_from_env
                .filter(|token| !token.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingCredential {
                    var: TOKEN_ENV_VAR.to_string(),
                })?;
        }

        if self.buttons.is_empty() {
            return Err(ConfigError::ValidationFailed {
                message: "at least one button must be configured".to_string(),
            });
        }

        let mut names = HashSet::new();
        for (index, button) in self.buttons.iter_mut().enumerate() {
            if button.name.trim().is_empty() {
                button.name = format!("button {}", index + 1);
            }
            if !names.insert(button.name.clone()) {
                return Err(ConfigError::ValidationFailed {
                    message: format!("duplicate button name '{}'", button.name),
                });
            }
            button.validate(engine)?;
        }

        Ok(())
    }
}

impl ButtonSpec {
    fn validate(&self, engine: &TemplateEngine) -> ConfigResult<()> {
        match &self.on.actions {
            OnActions::Static(actions) if actions.is_empty() => {
                Err(ConfigError::ValidationFailed {
                    message: format!("button '{}' has no on actions", self.name),
                })
            }
            OnActions::Static(_) => Ok(()),
            OnActions::Dynamic(variants) => {
                for (index, variant) in variants.iter().enumerate() {
                    let location = format!("button '{}' variant {}", self.name, index + 1);
                    if variant.actions.is_empty() {
                        return Err(ConfigError::ValidationFailed {
                            message: format!("{} has no actions", location),
                        });
                    }
                    if let Some(when) = &variant.when {
                        when.validate(engine)
                            .map_err(|source| ConfigError::Template { location, source })?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Accept `true`/`false` as booleans or strings (as produced by `!env_var`)
fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(b) => Ok(b),
        BoolOrString::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean '{}'", other))),
        },
    }
}
