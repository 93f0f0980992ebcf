//! Sandboxed Jinja2 expressions for ha-multi-click
//!
//! Button configurations may pick between action lists depending on the
//! time of day. This crate provides the minijinja environment those
//! expressions run in, plus the declarative [`Condition`] types that cover
//! the common cases without a template.
//!
//! # Functions
//!
//! - `now()` - Current local time (`hour`, `minute`, `second`, `weekday`, `isoformat`)
//! - `after(t)` - Whether `t` has been reached today
//! - `before(t)` - Whether `t` is still ahead today
//! - `between(start, end)` - Whether now is in `[start, end)`, wrapping overnight
//! - `env(name, default)` - Environment variable lookup
//!
//! Times are written as an hour (`18`) or `"HH:MM[:SS]"`. Nothing else from
//! the host is reachable from a template.
//!
//! # Example
//!
//! ```ignore
//! use ha_template::{TemplateEngine, When};
//!
//! let engine = TemplateEngine::new();
//! let when: When = serde_yaml::from_str("\"{{ between('08:00', '18:00') }}\"")?;
//! if when.evaluate(&engine)? {
//!     // daytime actions
//! }
//! ```

mod condition;
mod engine;
mod error;
mod globals;

pub use condition::{
    AndCondition, Condition, NotCondition, OrCondition, TemplateCondition, TimeCondition,
    WeekdaySpec, When,
};
pub use engine::TemplateEngine;
pub use error::{TemplateError, TemplateResult};
pub use globals::{in_window, Clock, FixedClock, SystemClock, TimeOfDay};

// Re-export minijinja Value for convenience
pub use minijinja::Value;
