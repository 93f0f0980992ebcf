//! Declarative conditions for choosing between action variants
//!
//! Supported condition types:
//! - `time` - local time window and weekday filter
//! - `template` - a Jinja2 expression rendered to a truthy string
//! - `and`, `or`, `not` - logical combinators

use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::engine::TemplateEngine;
use crate::error::TemplateResult;
use crate::globals::{in_window, TimeOfDay};

/// Condition definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum Condition {
    /// Check current time
    Time(TimeCondition),

    /// Evaluate a template
    Template(TemplateCondition),

    /// All conditions must be true (AND)
    And(AndCondition),

    /// Any condition must be true (OR)
    Or(OrCondition),

    /// None of the conditions may be true (NOT)
    Not(NotCondition),
}

impl Condition {
    /// Create an AND condition
    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::And(AndCondition { conditions })
    }

    /// Create an OR condition
    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Or(OrCondition { conditions })
    }

    /// Create a NOT condition
    pub fn not(conditions: Vec<Condition>) -> Self {
        Condition::Not(NotCondition { conditions })
    }

    /// Create a template condition
    pub fn template(value_template: impl Into<String>) -> Self {
        Condition::Template(TemplateCondition {
            value_template: value_template.into(),
        })
    }

    /// Evaluate against the engine's clock
    pub fn evaluate(&self, engine: &TemplateEngine) -> TemplateResult<bool> {
        match self {
            Condition::Time(time) => Ok(time.evaluate(engine)),
            Condition::Template(t) => engine.render_bool(&t.value_template),
            Condition::And(c) => {
                for condition in &c.conditions {
                    if !condition.evaluate(engine)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or(c) => {
                for condition in &c.conditions {
                    if condition.evaluate(engine)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(c) => {
                for condition in &c.conditions {
                    if condition.evaluate(engine)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Compile every template this condition contains
    pub fn validate(&self, engine: &TemplateEngine) -> TemplateResult<()> {
        match self {
            Condition::Time(_) => Ok(()),
            Condition::Template(t) => engine.validate(&t.value_template),
            Condition::And(AndCondition { conditions })
            | Condition::Or(OrCondition { conditions })
            | Condition::Not(NotCondition { conditions }) => conditions
                .iter()
                .try_for_each(|condition| condition.validate(engine)),
        }
    }
}

/// Time condition - check current time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeCondition {
    /// Must be at or after this time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<TimeOfDay>,

    /// Must be before this time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<TimeOfDay>,

    /// Only on these weekdays
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekday: Vec<WeekdaySpec>,
}

impl TimeCondition {
    fn evaluate(&self, engine: &TemplateEngine) -> bool {
        let now = engine.clock().now();

        if !self.weekday.is_empty() {
            let today = now.weekday();
            if !self.weekday.iter().any(|w| Weekday::from(*w) == today) {
                trace!(?today, "Weekday doesn't match");
                return false;
            }
        }

        in_window(now.time(), self.after, self.before)
    }
}

/// Template condition - evaluate a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCondition {
    pub value_template: String,
}

/// AND condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AndCondition {
    pub conditions: Vec<Condition>,
}

/// OR condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrCondition {
    pub conditions: Vec<Condition>,
}

/// NOT condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotCondition {
    pub conditions: Vec<Condition>,
}

/// Weekday specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekdaySpec {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl From<WeekdaySpec> for Weekday {
    fn from(w: WeekdaySpec) -> Self {
        match w {
            WeekdaySpec::Mon => Weekday::Mon,
            WeekdaySpec::Tue => Weekday::Tue,
            WeekdaySpec::Wed => Weekday::Wed,
            WeekdaySpec::Thu => Weekday::Thu,
            WeekdaySpec::Fri => Weekday::Fri,
            WeekdaySpec::Sat => Weekday::Sat,
            WeekdaySpec::Sun => Weekday::Sun,
        }
    }
}

/// The `when` guard of an action variant
///
/// Written as a bare template string, a single condition, or a list of
/// conditions that must all hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum When {
    Template(String),
    One(Condition),
    All(Vec<Condition>),
}

impl When {
    pub fn evaluate(&self, engine: &TemplateEngine) -> TemplateResult<bool> {
        match self {
            When::Template(template) => engine.render_bool(template),
            When::One(condition) => condition.evaluate(engine),
            When::All(conditions) => {
                for condition in conditions {
                    if !condition.evaluate(engine)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    pub fn validate(&self, engine: &TemplateEngine) -> TemplateResult<()> {
        match self {
            When::Template(template) => engine.validate(template),
            When::One(condition) => condition.validate(engine),
            When::All(conditions) => conditions.iter().try_for_each(|c| c.validate(engine)),
        }
    }
}
