//! Template engine for button expressions
//!
//! Provides Jinja2-compatible rendering restricted to a small set of
//! time and environment helpers.

use crate::error::TemplateResult;
use crate::globals::{self, Clock, SystemClock};
use minijinja::{Environment, UndefinedBehavior, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Template engine with time-of-day helpers
///
/// The engine provides:
/// - `now()` with `hour`, `minute`, `second`, `weekday` and `isoformat`
/// - `before(t)`, `after(t)` and `between(start, end)`
/// - `env(name, default)` for environment lookups
///
/// Undefined names are errors rather than empty strings.
pub struct TemplateEngine {
    env: Environment<'static>,
    clock: Arc<dyn Clock>,
}

impl TemplateEngine {
    /// Create an engine reading the host's local time
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an engine reading time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut env = Environment::new();

        env.set_debug(true);
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        Self::register_globals(&mut env, clock.clone());

        Self { env, clock }
    }

    fn register_globals(env: &mut Environment<'static>, clock: Arc<dyn Clock>) {
        let clock_for_now = clock.clone();
        env.add_function("now", move || globals::now(clock_for_now.as_ref()));

        let clock_for_after = clock.clone();
        env.add_function("after", move |t: Value| {
            globals::after(clock_for_after.as_ref(), &t)
        });

        let clock_for_before = clock.clone();
        env.add_function("before", move |t: Value| {
            globals::before(clock_for_before.as_ref(), &t)
        });

        env.add_function("between", move |start: Value, end: Value| {
            globals::between(clock.as_ref(), &start, &end)
        });

        env.add_function("env", |name: &str, default: Option<Value>| {
            globals::env_var(name, default)
        });
    }

    /// Render a template string
    pub fn render(&self, template: &str) -> TemplateResult<String> {
        debug!("Rendering template: {}", template);

        let tmpl = self.env.template_from_str(template)?;
        let result = tmpl.render(())?;

        Ok(result)
    }

    /// Render a template and interpret the output as a boolean
    ///
    /// `true`, `yes`, `on` and `1` (any case) are true; everything else is
    /// false.
    pub fn render_bool(&self, template: &str) -> TemplateResult<bool> {
        let rendered = self.render(template)?;
        let rendered = rendered.trim().to_ascii_lowercase();
        Ok(matches!(rendered.as_str(), "true" | "yes" | "on" | "1"))
    }

    /// Evaluate a bare expression and return the value
    pub fn evaluate(&self, expression: &str) -> TemplateResult<Value> {
        let expr = self.env.compile_expression(expression)?;
        let result = expr.eval(())?;
        Ok(result)
    }

    /// Compile a template without rendering it
    pub fn validate(&self, template: &str) -> TemplateResult<()> {
        self.env.template_from_str(template)?;
        Ok(())
    }

    /// Check if a template string contains template syntax
    pub fn is_template(template: &str) -> bool {
        template.contains("{{") || template.contains("{%") || template.contains("{#")
    }

    /// The clock used by `now()` and the time helpers
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::FixedClock;
    use crate::TemplateError;
    use chrono::NaiveDate;

    fn make_test_engine(h: u32, m: u32, s: u32) -> TemplateEngine {
        let now = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap();
        TemplateEngine::with_clock(FixedClock::new(now))
    }

    // ==================== Basic Rendering Tests ====================

    #[test]
    fn test_simple_render() {
        let engine = make_test_engine(12, 0, 0);
        let result = engine.render("Hello, World!").unwrap();
        assert_eq!(result, "Hello, World!");
    }

    #[test]
    fn test_undefined_is_error() {
        let engine = make_test_engine(12, 0, 0);
        let err = engine.render("{{ nope }}").unwrap_err();
        assert!(matches!(err, TemplateError::UndefinedVariable { .. }));
    }

    #[test]
    fn test_unknown_function_is_error() {
        let engine = make_test_engine(12, 0, 0);
        assert!(engine.render("{{ states('light.x') }}").is_err());
    }

    // ==================== Time Tests ====================

    #[test]
    fn test_now_fields() {
        let engine = make_test_engine(14, 5, 9);
        assert_eq!(engine.render("{{ now().hour }}").unwrap(), "14");
        assert_eq!(engine.render("{{ now().minute }}").unwrap(), "5");
        assert_eq!(engine.render("{{ now().second }}").unwrap(), "9");
        // 2024-03-15 was a Friday
        assert_eq!(engine.render("{{ now().weekday }}").unwrap(), "4");
        assert_eq!(
            engine.render("{{ now().isoformat }}").unwrap(),
            "2024-03-15T14:05:09"
        );
    }

    #[test]
    fn test_after_and_before() {
        let engine = make_test_engine(9, 30, 0);
        assert!(engine.render_bool("{{ after(9) }}").unwrap());
        assert!(engine.render_bool("{{ after('09:30') }}").unwrap());
        assert!(!engine.render_bool("{{ after('09:30:01') }}").unwrap());
        assert!(engine.render_bool("{{ before(10) }}").unwrap());
        assert!(!engine.render_bool("{{ before('09:30') }}").unwrap());
        // minijinja prints booleans capitalised
        assert_eq!(engine.render("{{ after(9) }}").unwrap(), "True");
    }

    #[test]
    fn test_between() {
        let day = make_test_engine(12, 0, 0);
        let night = make_test_engine(23, 0, 0);

        assert!(day.render_bool("{{ between('08:00', '18:00') }}").unwrap());
        assert!(!night.render_bool("{{ between(8, 18) }}").unwrap());
        assert!(night.render_bool("{{ between('22:00', '06:00') }}").unwrap());
        assert!(!day.render_bool("{{ between(22, 6) }}").unwrap());
    }

    #[test]
    fn test_bad_time_argument() {
        let engine = make_test_engine(12, 0, 0);
        assert!(engine.render("{{ after('noon') }}").is_err());
        assert!(engine.render("{{ before(42) }}").is_err());
        assert!(engine.render("{{ between([1], 2) }}").is_err());
    }

    // ==================== Environment Tests ====================

    #[test]
    fn test_env_lookup() {
        std::env::set_var("HA_TEMPLATE_TEST_ROOM", "office");
        let engine = make_test_engine(12, 0, 0);
        assert_eq!(
            engine.render("{{ env('HA_TEMPLATE_TEST_ROOM') }}").unwrap(),
            "office"
        );
        assert_eq!(
            engine
                .render("{{ env('HA_TEMPLATE_TEST_MISSING', 'fallback') }}")
                .unwrap(),
            "fallback"
        );
        assert!(engine
            .render_bool("{{ env('HA_TEMPLATE_TEST_MISSING') is none }}")
            .unwrap());
    }

    // ==================== Evaluation Tests ====================

    #[test]
    fn test_render_bool() {
        let engine = make_test_engine(12, 0, 0);
        assert!(engine.render_bool("{{ true }}").unwrap());
        assert!(engine.render_bool(" YES ").unwrap());
        assert!(engine.render_bool("{{ 1 }}").unwrap());
        assert!(!engine.render_bool("{{ false }}").unwrap());
        assert!(!engine.render_bool("maybe").unwrap());
    }

    #[test]
    fn test_evaluate_expression() {
        let engine = make_test_engine(7, 0, 0);
        let value = engine.evaluate("now().hour + 1").unwrap();
        assert_eq!(value.as_i64(), Some(8));
    }

    #[test]
    fn test_validate() {
        let engine = make_test_engine(12, 0, 0);
        assert!(engine.validate("{{ between(8, 18) }}").is_ok());
        assert!(matches!(
            engine.validate("{% if %}"),
            Err(TemplateError::SyntaxError { .. })
        ));
    }

    #[test]
    fn test_is_template() {
        assert!(TemplateEngine::is_template("{{ now() }}"));
        assert!(TemplateEngine::is_template("{% if x %}"));
        assert!(!TemplateEngine::is_template("plain"));
    }
}
