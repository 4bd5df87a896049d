//! Wakeups for the mailbox service loop

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Notify mode still ticks occasionally in case an event is dropped
const FALLBACK_FACTOR: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WatchBackend {
    /// Fixed-interval directory scans
    #[default]
    Polling,
    /// Filesystem notifications with a slow fallback tick
    Notify,
}

struct NotifySource {
    // Dropping the watcher stops the events
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<()>,
}

pub struct MailboxWatcher {
    tick: Interval,
    notify: Option<NotifySource>,
}

impl MailboxWatcher {
    /// Watch `dir`. A notify backend that cannot start falls back to polling.
    pub fn new(dir: &Path, backend: WatchBackend, poll: Duration) -> Self {
        let notify = match backend {
            WatchBackend::Polling => None,
            WatchBackend::Notify => match start_notify(dir) {
                Ok(source) => Some(source),
                Err(e) => {
                    tracing::warn!(
                        dir = %dir.display(),
                        error = %e,
                        "Filesystem notifications unavailable, polling instead"
                    );
                    None
                }
            },
        };
        let period = if notify.is_some() {
            poll * FALLBACK_FACTOR
        } else {
            poll
        };
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { tick, notify }
    }

    pub fn backend(&self) -> WatchBackend {
        if self.notify.is_some() {
            WatchBackend::Notify
        } else {
            WatchBackend::Polling
        }
    }

    /// Resolve on the next tick or filesystem event. The first call returns
    /// immediately so existing messages are drained at startup.
    pub async fn wait(&mut self) {
        let disconnected = match &mut self.notify {
            Some(source) => {
                let event = tokio::select! {
                    _ = self.tick.tick() => return,
                    event = source.rx.recv() => event,
                };
                match event {
                    Some(()) => {
                        // Coalesce a burst into one wakeup
                        while source.rx.try_recv().is_ok() {}
                        false
                    }
                    None => true,
                }
            }
            None => {
                self.tick.tick().await;
                false
            }
        };
        if disconnected {
            tracing::warn!("Watcher channel disconnected, polling instead");
            self.notify = None;
        }
    }
}

fn start_notify(dir: &Path) -> notify::Result<NotifySource> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) => {
            let _ = tx.send(());
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Watch error"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(NotifySource {
        _watcher: watcher,
        rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_polling_wakes_on_interval() {
        let temp = TempDir::new().unwrap();
        let mut watcher = MailboxWatcher::new(temp.path(), WatchBackend::Polling, Duration::from_millis(10));
        assert_eq!(watcher.backend(), WatchBackend::Polling);
        let started = std::time::Instant::now();
        watcher.wait().await;
        watcher.wait().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_notify_wakes_on_new_file() {
        let temp = TempDir::new().unwrap();
        let mut watcher = MailboxWatcher::new(temp.path(), WatchBackend::Notify, Duration::from_secs(30));
        // Initial tick
        watcher.wait().await;
        std::fs::write(temp.path().join("x.md"), "hi").unwrap();
        // Either the event or, if notifications are unavailable here, the poll tick
        tokio::time::timeout(Duration::from_secs(60), watcher.wait())
            .await
            .unwrap();
    }
}
