//! Periodic Tasks
//!
//! Cancellable fixed-interval jobs (report saving, portfolio reloading).
//! The first run happens one period after spawning; a slow run delays the
//! next one instead of bursting to catch up.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle to a running periodic job.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Run `job` every `period` until `shutdown` or this task is cancelled.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<F, Fut>(
        name: &'static str,
        period: Duration,
        shutdown: &CancellationToken,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = shutdown.child_token();
        let token = cancel.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        tracing::trace!(task = name, "Periodic task tick");
                        job().await;
                    }
                }
            }
            tracing::debug!(task = name, "Periodic task stopped");
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    /// Task name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Stop scheduling further runs.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the current run to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(task = self.name, error = %e, "Periodic task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counting(counter: &Arc<AtomicU32>) -> impl FnMut() -> std::future::Ready<()> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn first_run_after_one_period() {
        let shutdown = CancellationToken::new();
        let runs = Arc::new(AtomicU32::new(0));
        let task = PeriodicTask::spawn("save", Duration::from_millis(100), &shutdown, counting(&runs));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(runs.load(Ordering::SeqCst) >= 2);

        task.shutdown().await;
    }

    #[tokio::test]
    async fn parent_shutdown_stops_task() {
        let shutdown = CancellationToken::new();
        let runs = Arc::new(AtomicU32::new(0));
        let task = PeriodicTask::spawn("reload", Duration::from_millis(50), &shutdown, counting(&runs));
        assert_eq!(task.name(), "reload");

        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        task.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_only_affects_this_task() {
        let shutdown = CancellationToken::new();
        let stopped_runs = Arc::new(AtomicU32::new(0));
        let running_runs = Arc::new(AtomicU32::new(0));
        let stopped = PeriodicTask::spawn("a", Duration::from_millis(50), &shutdown, counting(&stopped_runs));
        let running = PeriodicTask::spawn("b", Duration::from_millis(50), &shutdown, counting(&running_runs));

        stopped.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(stopped_runs.load(Ordering::SeqCst), 0);
        assert!(running_runs.load(Ordering::SeqCst) >= 1);
        assert!(!shutdown.is_cancelled());
        running.shutdown().await;
        stopped.shutdown().await;
    }
}
