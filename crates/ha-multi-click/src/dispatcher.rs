//! Per-button click cycles
//!
//! A [`ButtonDispatcher`] owns one button's subscriptions and its
//! [`ClickCycle`]. Both triggers feed a single channel consumed by one task,
//! so the "on" and "off" handlers of a button never overlap while different
//! buttons run independently.

use ha_config::ButtonSpec;
use ha_core::Action;
use ha_template::TemplateEngine;
use ha_ws_client::{
    ClientResult, Connection, SubscribeOptions, SubscriptionEvent, SubscriptionHandle,
    SubscriptionKey,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const UNSUBSCRIBE_ATTEMPTS: u32 = 3;
const UNSUBSCRIBE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Log at info when verbose, debug otherwise
macro_rules! press_log {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

/// Position in a button's action list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickCycle {
    count: usize,
    last_change: Option<Instant>,
}

impl ClickCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// When the cycle last moved, if ever
    pub fn last_change(&self) -> Option<Instant> {
        self.last_change
    }

    /// Pick the action for an "on" press among `len` and advance
    ///
    /// The index is clamped to the end of the list, which may have shrunk
    /// since the previous press. Returns `None` for an empty list, leaving
    /// the cycle untouched.
    pub fn on_press(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let index = self.count.min(len - 1);
        self.count = (self.count + 1) % len;
        self.last_change = Some(Instant::now());
        Some(index)
    }

    /// "off" press: back to the first action
    pub fn reset(&mut self) {
        self.count = 0;
        self.last_change = Some(Instant::now());
    }
}

/// How a dispatcher subscribes and logs
#[derive(Debug, Clone, Copy)]
pub struct AttachOptions {
    /// Ask the connection to restore the subscriptions after a socket-level
    /// reconnect
    pub resubscribe: bool,
    /// Log every press at info level
    pub verbose: bool,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            resubscribe: true,
            verbose: false,
        }
    }
}

impl AttachOptions {
    /// For bring-ups that resubscribe explicitly on every connection
    pub fn manual(verbose: bool) -> Self {
        Self {
            resubscribe: false,
            verbose,
        }
    }
}

impl From<AttachOptions> for SubscribeOptions {
    fn from(options: AttachOptions) -> Self {
        SubscribeOptions {
            resubscribe: options.resubscribe,
        }
    }
}

/// A button bridged to Home Assistant
pub struct ButtonDispatcher {
    name: String,
    on: SubscriptionHandle,
    off: SubscriptionHandle,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<ClickCycle>,
}

impl ButtonDispatcher {
    /// Subscribe the button's triggers and start handling presses
    pub async fn attach(
        button: ButtonSpec,
        connection: &Connection,
        engine: Arc<TemplateEngine>,
        options: AttachOptions,
    ) -> ClientResult<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let on = connection
            .subscribe(button.on.trigger.clone(), options.into(), tx.clone())
            .await?;
        let off = match connection
            .subscribe(button.off.trigger.clone(), options.into(), tx)
            .await
        {
            Ok(off) => off,
            Err(e) => {
                release(&button.name, &on).await;
                return Err(e);
            }
        };

        debug!(
            button = %button.name,
            on = %button.on.trigger,
            off = %button.off.trigger,
            "Subscribed"
        );

        let name = button.name.clone();
        let worker = Worker {
            on_key: on.key(),
            off_key: off.key(),
            button,
            engine,
            connection: connection.clone(),
            cycle: ClickCycle::new(),
            verbose: options.verbose,
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(worker.run(rx, stop_rx));

        Ok(Self {
            name,
            on,
            off,
            stop: Some(stop_tx),
            task,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unsubscribe both triggers, then stop the handler task
    ///
    /// Returns the final cycle state.
    pub async fn detach(mut self) -> ClickCycle {
        release(&self.name, &self.on).await;
        release(&self.name, &self.off).await;

        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match (&mut self.task).await {
            Ok(cycle) => cycle,
            Err(e) => {
                warn!(button = %self.name, error = %e, "Button task failed");
                ClickCycle::new()
            }
        }
    }
}

impl Drop for ButtonDispatcher {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}

/// Unsubscribe, retrying a few times before giving up on the handle
async fn release(button: &str, handle: &SubscriptionHandle) {
    for attempt in 1..=UNSUBSCRIBE_ATTEMPTS {
        match handle.unsubscribe().await {
            Ok(()) => return,
            Err(e) => {
                warn!(button, error = %e, attempt, "Failed to unsubscribe");
                tokio::time::sleep(UNSUBSCRIBE_RETRY_DELAY).await;
            }
        }
    }
}

struct Worker {
    button: ButtonSpec,
    engine: Arc<TemplateEngine>,
    connection: Connection,
    cycle: ClickCycle,
    on_key: SubscriptionKey,
    off_key: SubscriptionKey,
    verbose: bool,
}

impl Worker {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SubscriptionEvent>,
        mut stop: oneshot::Receiver<()>,
    ) -> ClickCycle {
        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                event = events.recv() => match event {
                    Some(event) if event.subscription == self.on_key => self.on_press().await,
                    Some(event) if event.subscription == self.off_key => self.off_press().await,
                    Some(_) => {}
                    None => break,
                },
            }
        }
        self.cycle
    }

    async fn on_press(&mut self) {
        let name = &self.button.name;
        let actions = match self.button.on.actions.resolve(&self.engine) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(button = %name, error = %e, "Failed to resolve actions");
                return;
            }
        };

        let Some(index) = self.cycle.on_press(actions.len()) else {
            warn!(button = %name, "No actions apply to this press, ignoring");
            return;
        };
        let action = actions[index].clone();

        press_log!(
            self.verbose,
            button = %name,
            index,
            action = %action,
            "Received 'on' for '{}'",
            name
        );
        self.dispatch(action).await;
    }

    async fn off_press(&mut self) {
        self.cycle.reset();
        let action = self.button.off.action.clone();

        let name = &self.button.name;
        press_log!(
            self.verbose,
            button = %name,
            action = %action,
            "Received 'off' for '{}'",
            name
        );
        self.dispatch(action).await;
    }

    async fn dispatch(&self, action: Action) {
        let service = action.service_id();
        if let Err(e) = self.connection.call_service(action).await {
            warn!(
                button = %self.button.name,
                service = %service,
                error = %e,
                "Service call failed"
            );
        }
    }
}
