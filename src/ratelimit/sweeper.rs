//! Background reclamation of expired windows.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::window::{now_millis, WindowStore};

/// A running sweep task over a [`WindowStore`].
///
/// The task stops when [`Sweeper::shutdown`] is called or when the
/// `Sweeper` is dropped.
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a sweep task on the current tokio runtime.
    ///
    /// `every` must be non-zero.
    pub(crate) fn spawn(store: Arc<WindowStore>, every: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(interval_ms = every.as_millis() as u64, "Window sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep(now_millis());
                        debug!(removed, remaining = store.len(), "Swept expired windows");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Window sweeper stopped");
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Window sweeper task failed");
        }
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::window::WindowEntry;

    #[tokio::test]
    async fn test_sweeper_removes_expired_windows() {
        let store = Arc::new(WindowStore::new());
        store.set("expired", WindowEntry { count: 1, reset_at: 1 });
        store.set("live", WindowEntry { count: 1, reset_at: u64::MAX });

        let sweeper = Sweeper::spawn(Arc::clone(&store), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.get("expired"), None);
        assert!(store.get("live").is_some());

        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let store = Arc::new(WindowStore::new());
        let sweeper = Sweeper::spawn(Arc::clone(&store), Duration::from_secs(300));
        assert!(!sweeper.is_finished());

        tokio::time::timeout(Duration::from_secs(1), sweeper.shutdown())
            .await
            .expect("sweeper did not stop");
    }

    #[tokio::test]
    async fn test_dropping_sweeper_stops_task() {
        let store = Arc::new(WindowStore::new());
        let sweeper = Sweeper::spawn(Arc::clone(&store), Duration::from_secs(300));
        drop(sweeper);

        // The task holds the only other reference to the store.
        tokio::time::timeout(Duration::from_secs(1), async {
            while Arc::strong_count(&store) > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sweeper kept running after drop");
    }
}
