//! Multi-click buttons for Home Assistant
//!
//! Each configured button has an "on" and an "off" trigger. Repeated "on"
//! presses step through a list of service calls; "off" always fires its own
//! action and starts the cycle over.
//!
//! - [`ButtonDispatcher`] runs one button's click cycle.
//! - [`Supervisor`] owns the connection and all dispatchers, and rebuilds
//!   them on configuration changes, disconnects and the periodic forced
//!   reconnect.

pub mod dispatcher;
pub mod logging;
pub mod settings;
pub mod signals;
pub mod supervisor;

pub use dispatcher::{AttachOptions, ButtonDispatcher, ClickCycle};
pub use settings::Settings;
pub use supervisor::{ConnectorFactory, ExitReason, Supervisor, SupervisorHandle};
