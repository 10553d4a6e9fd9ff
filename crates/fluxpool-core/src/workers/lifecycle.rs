//! Shared shutdown signal and the periodic loop every worker runs on.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Owns the shutdown channel and the handles of every started worker.
pub struct WorkerSet {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for WorkerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSet {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { shutdown_tx, handles: Vec::new() }
    }

    /// Receiver to hand to a worker's `start`.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Raise the stop signal and wait for every loop to finish its current iteration.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.handles {
            match handle.await {
                Ok(()) => tracing::debug!(worker = name, "[Workers] stopped"),
                Err(e) => tracing::error!(worker = name, error = %e, "[Workers] task panicked"),
            }
        }
        tracing::info!("[Workers] all workers stopped");
    }
}

pub(crate) fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Run `tick` every `period` until the shutdown signal is raised.
///
/// The first tick fires immediately when `run_immediately` is set. A tick in
/// progress always completes; the loop exits before the next one.
pub(crate) async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    run_immediately: bool,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !run_immediately {
        interval.tick().await;
    }

    tracing::info!(worker = name, period_secs = period.as_secs(), "[Workers] started");
    loop {
        if is_shutdown(&shutdown) {
            break;
        }
        tokio::select! {
            _ = interval.tick() => tick().await,
            _ = shutdown.changed() => break,
        }
    }
    tracing::info!(worker = name, "[Workers] shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_periodic_loop() {
        let mut set = WorkerSet::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let handle = tokio::spawn(run_periodic(
            "test",
            Duration::from_secs(10),
            true,
            set.subscribe(),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));
        set.push("test", handle);

        tokio::time::sleep(Duration::from_secs(25)).await;
        set.shutdown().await;

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_with_no_workers() {
        let set = WorkerSet::default();
        assert!(set.is_empty());
        set.shutdown().await;
    }
}
