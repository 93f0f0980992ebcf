//! Hot reload of the configuration file
//!
//! The watcher polls a content fingerprint of every file the last load
//! read. The fingerprint is taken right after loading, before the handler
//! runs. Polling is suspended while the handler runs, so any number of
//! edits made meanwhile collapse into one follow-up reload.

use crate::error::ConfigResult;
use crate::schema::Configuration;
use crate::source::ConfigSource;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default interval between fingerprint checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Quiet period between noticing a change and reloading
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Receives every load result, starting with the initial one
#[async_trait]
pub trait ReloadHandler: Send + 'static {
    async fn on_change(&mut self, update: ConfigResult<Configuration>);
}

/// Watches a [`ConfigSource`] and reports each reload
pub struct ConfigWatcher {
    source: ConfigSource,
    poll_interval: Duration,
    debounce: Duration,
}

impl ConfigWatcher {
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            poll_interval: DEFAULT_POLL_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Load once, hand the result to `handler`, then keep watching
    ///
    /// The initial `on_change` has completed by the time this returns.
    pub async fn monitor<H: ReloadHandler>(self, mut handler: H) -> WatchHandle {
        let (result, files) = self.source.load_tracked();
        let baseline = Fingerprint::capture(&files).await;
        handler.on_change(result).await;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(handler, files, baseline, stop_rx));

        WatchHandle {
            stop: Some(stop_tx),
            task,
        }
    }

    async fn run<H: ReloadHandler>(
        self,
        mut handler: H,
        mut files: Vec<PathBuf>,
        mut baseline: Fingerprint,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            path = %self.source.path().display(),
            files = files.len(),
            "Watching configuration"
        );

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {}
            }

            if Fingerprint::capture(&files).await == baseline {
                continue;
            }

            debug!("Configuration change detected");
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = sleep(self.debounce) => {}
            }

            info!(path = %self.source.path().display(), "Reloading configuration");
            let (result, reloaded_files) = self.source.load_tracked();
            files = reloaded_files;
            baseline = Fingerprint::capture(&files).await;
            if let Err(e) = &result {
                warn!(error = %e, "Configuration reload failed");
            }
            handler.on_change(result).await;
            ticker.reset();
        }

        debug!("Configuration watcher stopped");
    }
}

/// Stops the watcher when asked or dropped
pub struct WatchHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop watching and wait for an in-flight reload to finish
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!(error = %e, "Configuration watcher task join error");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}

/// Content hash of the watched files; missing files hash differently from
/// empty ones
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint(Vec<Option<u64>>);

impl Fingerprint {
    async fn capture(files: &[PathBuf]) -> Self {
        let mut hashes = Vec::with_capacity(files.len());
        for path in files {
            let hash = tokio::fs::read(path).await.ok().map(|bytes| {
                let mut hasher = DefaultHasher::new();
                bytes.hash(&mut hasher);
                hasher.finish()
            });
            hashes.push(hash);
        }
        Fingerprint(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fingerprint_tracks_content() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.yaml");
        let missing = dir.path().join("secrets.yaml");
        std::fs::write(&file, "one").unwrap();

        let files = vec![file.clone(), missing.clone()];
        let first = Fingerprint::capture(&files).await;
        assert_eq!(first, Fingerprint::capture(&files).await);
        assert_eq!(first.0[1], None);

        std::fs::write(&file, "two").unwrap();
        assert_ne!(first, Fingerprint::capture(&files).await);

        std::fs::write(&missing, "").unwrap();
        let with_secrets = Fingerprint::capture(&files).await;
        assert!(with_secrets.0[1].is_some());
    }
}
