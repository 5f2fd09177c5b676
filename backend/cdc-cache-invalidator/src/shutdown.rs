use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every tracked task finished within the drain timeout
    Clean,
    TimedOut,
}

/// Process-wide cancellation plus a wait-group over the background tasks.
///
/// A tracked task is counted exactly once when it finishes, whether it
/// returns, is cancelled or panics.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    cancel_token: CancellationToken,
    tracker: TaskTracker,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            drain_timeout,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Spawn a task that `drain` waits for.
    pub fn spawn<F>(&self, task: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Cancel every task and wait for them up to the drain timeout.
    ///
    /// A timeout is reported, never escalated; the caller exits either way.
    pub async fn drain(&self) -> DrainOutcome {
        self.cancel_token.cancel();
        self.tracker.close();

        match tokio::time::timeout(self.drain_timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("All consumers shut down cleanly");
                DrainOutcome::Clean
            }
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    "Shutdown timeout exceeded after {:?}, exiting anyway", self.drain_timeout
                );
                DrainOutcome::TimedOut
            }
        }
    }
}

/// Resolve on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_cancelled_task() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let token = coordinator.cancel_token();
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        coordinator.spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert_eq!(coordinator.drain().await, DrainOutcome::Clean);
        assert!(coordinator.cancel_token().is_cancelled());
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_on_stuck_task() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));

        coordinator.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        assert_eq!(coordinator.drain().await, DrainOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_panicking_task_is_still_counted_once() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));

        let handle = coordinator.spawn(async {
            panic!("consumer blew up");
        });
        assert!(handle.await.is_err());

        assert_eq!(coordinator.drain().await, DrainOutcome::Clean);
    }

    #[tokio::test]
    async fn test_drain_without_tasks_is_clean() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(10));
        assert_eq!(coordinator.drain().await, DrainOutcome::Clean);
    }
}
