//! Selects a watcher backend and defers starting it until the first
//! indexing cycle completes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use broker_core::prelude::*;
use broker_lsp::ProgressTracker;
use tokio::sync::mpsc;

use crate::native::EventWatcher;
use crate::polling::{PollingWatcher, DEFAULT_INTERVAL, DEFAULT_WORKERS};
use crate::snapshot::WatchedChange;

/// How the workspace is watched for changes, as configured by
/// `FILE_WATCHER_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherMode {
    Off,
    Polling,
    Fsnotify,
    Auto,
}

impl WatcherMode {
    /// Parse the environment variable's value, including its documented
    /// aliases. Unrecognized or empty input falls back to `Auto`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" | "manual" | "disabled" => WatcherMode::Off,
            "polling" | "poll" => WatcherMode::Polling,
            "fsnotify" | "inotify" | "native" => WatcherMode::Fsnotify,
            "auto" | "" => WatcherMode::Auto,
            other => {
                warn!(value = other, "unrecognized FILE_WATCHER_MODE, defaulting to auto");
                WatcherMode::Auto
            }
        }
    }
}

pub struct WatcherConfig {
    pub mode: WatcherMode,
    pub interval: Duration,
    pub workers: usize,
    pub workspace_root: PathBuf,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatcherMode::Auto,
            interval: DEFAULT_INTERVAL,
            workers: DEFAULT_WORKERS,
            workspace_root: PathBuf::from("/projects"),
        }
    }
}

/// How long to wait between checks of whether indexing has finished, before
/// the watcher is allowed to start at all.
const DEFERRED_START_POLL: Duration = Duration::from_secs(5);

/// The running backend, kept alive only to extend its lifetime; changes are
/// consumed from the returned channel.
enum Backend {
    Polling(#[allow(dead_code)] Arc<PollingWatcher>),
    Event(#[allow(dead_code)] EventWatcher),
    Off,
}

pub struct Watcher {
    _backend: Backend,
}

impl Watcher {
    /// Block until indexing finishes (polling the tracker every 5s), then
    /// start the configured backend. Returns immediately with `Off` mode.
    pub async fn start(
        config: WatcherConfig,
        progress: Arc<ProgressTracker>,
    ) -> Result<(Self, mpsc::Receiver<Vec<WatchedChange>>)> {
        if config.mode == WatcherMode::Off {
            let (_tx, rx) = mpsc::channel(1);
            return Ok((Self { _backend: Backend::Off }, rx));
        }

        wait_for_indexing_to_finish(&progress).await;

        match config.mode {
            WatcherMode::Polling => Ok(start_polling(config, progress)),
            WatcherMode::Fsnotify => start_native(&config).map(|(backend, rx)| {
                (Self { _backend: backend }, rx)
            }),
            WatcherMode::Auto => match start_native(&config) {
                Ok((backend, rx)) => Ok((Self { _backend: backend }, rx)),
                Err(e) => {
                    warn!(error = %e, "native watcher unavailable, falling back to polling");
                    Ok(start_polling(config, progress))
                }
            },
            WatcherMode::Off => unreachable!("handled above"),
        }
    }
}

async fn wait_for_indexing_to_finish(progress: &ProgressTracker) {
    while progress.is_indexing() {
        tokio::time::sleep(DEFERRED_START_POLL).await;
    }
}

fn start_polling(config: WatcherConfig, progress: Arc<ProgressTracker>) -> (Watcher, mpsc::Receiver<Vec<WatchedChange>>) {
    let watcher = Arc::new(PollingWatcher::new(config.workspace_root, config.interval, config.workers));
    let rx = watcher.clone().spawn(progress);
    (Watcher { _backend: Backend::Polling(watcher) }, rx)
}

fn start_native(config: &WatcherConfig) -> Result<(Backend, mpsc::Receiver<Vec<WatchedChange>>)> {
    let (watcher, rx) = EventWatcher::start(&config.workspace_root)?;
    Ok((Backend::Event(watcher), rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documented_aliases() {
        assert_eq!(WatcherMode::parse("off"), WatcherMode::Off);
        assert_eq!(WatcherMode::parse("disabled"), WatcherMode::Off);
        assert_eq!(WatcherMode::parse("poll"), WatcherMode::Polling);
        assert_eq!(WatcherMode::parse("inotify"), WatcherMode::Fsnotify);
        assert_eq!(WatcherMode::parse(""), WatcherMode::Auto);
        assert_eq!(WatcherMode::parse("nonsense"), WatcherMode::Auto);
    }

    #[tokio::test]
    async fn off_mode_starts_without_waiting_on_indexing() {
        let progress = Arc::new(ProgressTracker::new());
        progress.begin(Some("Index".to_string()), None, None);
        assert!(progress.is_indexing());

        let config = WatcherConfig { mode: WatcherMode::Off, ..Default::default() };
        let (_watcher, _rx) = tokio::time::timeout(
            Duration::from_millis(200),
            Watcher::start(config, progress),
        )
        .await
        .expect("off mode must not block on indexing state")
        .unwrap();
    }
}
