//! Global functions exposed to button expressions
//!
//! Provides now(), before(), after(), between() and env(). Nothing else from
//! the host process is reachable from inside a template.

use chrono::{Datelike, Local, NaiveDateTime, NaiveTime, Timelike};
use minijinja::value::Value;
use minijinja::{Error, ErrorKind};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::error::TemplateError;

// ==================== Clock ====================

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The host's local time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ==================== Time of day ====================

/// A time of day written either as an hour (`18`) or as `"HH:MM[:SS]"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay(pub NaiveTime);

impl TimeOfDay {
    pub fn from_hour(hour: i64) -> Result<Self, TemplateError> {
        u32::try_from(hour)
            .ok()
            .and_then(|h| NaiveTime::from_hms_opt(h, 0, 0))
            .map(TimeOfDay)
            .ok_or_else(|| TemplateError::InvalidTime {
                value: hour.to_string(),
            })
    }
}

impl FromStr for TimeOfDay {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        NaiveTime::parse_from_str(s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
            .map(TimeOfDay)
            .map_err(|_| TemplateError::InvalidTime {
                value: s.to_string(),
            })
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M:%S"))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TimeOfDayVisitor;

        impl<'de> de::Visitor<'de> for TimeOfDayVisitor {
            type Value = TimeOfDay;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an hour (0-23) or a \"HH:MM[:SS]\" string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<TimeOfDay, E> {
                TimeOfDay::from_hour(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<TimeOfDay, E> {
                let hour = i64::try_from(v).map_err(E::custom)?;
                TimeOfDay::from_hour(hour).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TimeOfDay, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(TimeOfDayVisitor)
    }
}

/// Whether `now` falls inside `[after, before)`
///
/// When `after` is later than `before` the window wraps past midnight.
pub fn in_window(now: NaiveTime, after: Option<TimeOfDay>, before: Option<TimeOfDay>) -> bool {
    match (after, before) {
        (Some(a), Some(b)) if a > b => now >= a.0 || now < b.0,
        _ => after.map_or(true, |a| now >= a.0) && before.map_or(true, |b| now < b.0),
    }
}

/// Convert a template argument into a time of day
fn time_arg(function: &str, value: &Value) -> Result<TimeOfDay, Error> {
    let parsed = if let Some(hour) = value.as_i64() {
        TimeOfDay::from_hour(hour)
    } else if let Some(s) = value.as_str() {
        s.parse()
    } else {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("{}() expects an hour or \"HH:MM[:SS]\", got {}", function, value.kind()),
        ));
    };

    parsed.map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("{}(): {}", function, e)))
}

// ==================== Time Functions ====================

#[derive(Serialize)]
struct NowSnapshot {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    /// 0 = Monday
    weekday: u32,
    isoformat: String,
}

/// The clock's current time as a plain mapping
pub fn now(clock: &dyn Clock) -> Value {
    let now = clock.now();
    Value::from_serialize(&NowSnapshot {
        year: now.year(),
        month: now.month(),
        day: now.day(),
        hour: now.hour(),
        minute: now.minute(),
        second: now.second(),
        weekday: now.weekday().num_days_from_monday(),
        isoformat: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
    })
}

/// True once the clock has reached `t` today
pub fn after(clock: &dyn Clock, t: &Value) -> Result<bool, Error> {
    let t = time_arg("after", t)?;
    Ok(in_window(clock.now().time(), Some(t), None))
}

/// True while the clock has not yet reached `t` today
pub fn before(clock: &dyn Clock, t: &Value) -> Result<bool, Error> {
    let t = time_arg("before", t)?;
    Ok(in_window(clock.now().time(), None, Some(t)))
}

/// True inside `[start, end)`, wrapping past midnight when `start > end`
pub fn between(clock: &dyn Clock, start: &Value, end: &Value) -> Result<bool, Error> {
    let start = time_arg("between", start)?;
    let end = time_arg("between", end)?;
    Ok(in_window(clock.now().time(), Some(start), Some(end)))
}

// ==================== Environment ====================

/// Read an environment variable, falling back to `default` (or none)
pub fn env_var(name: &str, default: Option<Value>) -> Value {
    match std::env::var(name) {
        Ok(value) => Value::from(value),
        Err(_) => default.unwrap_or(Value::from(())),
    }
}
