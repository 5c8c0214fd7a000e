//! Repeating task driver for periodic scans.
//!
//! A [`RepeatingTask`] owns one spawned tokio task that awaits an interval
//! tick or a cancel signal on a `watch` channel, whichever comes first. Each
//! tick body runs as its own task so a panicking tick is logged and the loop
//! keeps going. A tick in progress when `cancel()` is called runs to
//! completion; no tick starts after `cancel()` returns.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Handle on a periodically executed task.
#[derive(Debug)]
pub struct RepeatingTask {
    name: &'static str,
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    /// Run `tick` every `period`, first after one full period.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = cancel_rx.changed() => {
                        // A dropped sender also ends the loop.
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = tokio::spawn(tick()).await {
                            warn!(task = name, error = %e, "repeating task tick failed");
                        }
                    }
                }
            }
            debug!(task = name, "repeating task stopped");
        });

        Self {
            name,
            cancel_tx,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal cancellation and wait for the loop to exit.
    pub async fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "repeating task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = {
            let count = count.clone();
            RepeatingTask::spawn("counter", Duration::from_millis(10), move || {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        task.cancel().await;
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 3, "only {} ticks", after_cancel);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn test_first_tick_waits_one_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = {
            let count = count.clone();
            RepeatingTask::spawn("slow", Duration::from_secs(3600), move || {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!task.is_finished());
        task.cancel().await;
    }

    #[tokio::test]
    async fn test_panicking_tick_does_not_stop_the_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = {
            let count = count.clone();
            RepeatingTask::spawn("flaky", Duration::from_millis(10), move || {
                let count = count.clone();
                async move {
                    if count.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first tick fails");
                    }
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!task.is_finished());
        task.cancel().await;
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_in_flight_tick_completes_before_cancel_returns() {
        let finished = Arc::new(AtomicUsize::new(0));
        let task = {
            let finished = finished.clone();
            RepeatingTask::spawn("long", Duration::from_millis(5), move || {
                let finished = finished.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(40)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(15)).await;
        task.cancel().await;
        let done = finished.load(Ordering::SeqCst);
        assert!(done >= 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(finished.load(Ordering::SeqCst), done);
    }
}
