use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shortest accepted cycle period. Anything lower hammers the proxy
/// without producing fresher data than the devices report.
pub const MIN_INTERVAL_SECONDS: u64 = 30;

/// Periodic driver for fan-out cycles. Each tick starts at most one cycle;
/// a tick that lands while a cycle is still running is skipped, not queued.
pub struct RecurringFanout;

impl RecurringFanout {
    /// Starts the runner loop. The first cycle runs immediately, then one
    /// per interval. `task` is invoked once per accepted tick and runs on
    /// its own spawned task.
    pub fn start<F, Fut>(interval_seconds: u64, task: F) -> RecurringHandle
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval_seconds = interval_seconds.max(MIN_INTERVAL_SECONDS);
        Self::start_with_period(Duration::from_secs(interval_seconds), interval_seconds, task)
    }

    fn start_with_period<F, Fut>(
        period: Duration,
        interval_seconds: u64,
        task: F,
    ) -> RecurringHandle
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let in_flight = Arc::new(AtomicBool::new(false));

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        // A dropped handle counts as a stop signal.
                        if changed.is_err() || *shutdown_rx.borrow() {
                            tracing::info!("Recurring fan-out loop stopped");
                            return;
                        }
                    }
                    _ = ticker.tick() => {
                        dispatch_cycle(&task, &in_flight);
                    }
                }
            }
        });

        RecurringHandle {
            shutdown_tx,
            join,
            interval_seconds,
        }
    }
}

fn dispatch_cycle<F, Fut>(task: &F, in_flight: &Arc<AtomicBool>)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    if in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        tracing::debug!("Previous fan-out cycle still running, tick skipped");
        return;
    }

    let cycle = task();
    let in_flight = Arc::clone(in_flight);
    tokio::spawn(async move {
        // The flag must clear even when a cycle panics, so the cycle runs
        // on its own task.
        if tokio::spawn(cycle).await.is_err() {
            tracing::error!("Fan-out cycle task panicked");
        }
        in_flight.store(false, Ordering::SeqCst);
    });
}

/// Handle to a running recurring fan-out.
pub struct RecurringHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    interval_seconds: u64,
}

impl RecurringHandle {
    /// The effective cycle period, after the minimum floor.
    pub fn interval_seconds(&self) -> u64 {
        self.interval_seconds
    }

    /// Stops scheduling new cycles and waits for the loop to exit. A cycle
    /// already in flight completes on its own task and still publishes.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}
