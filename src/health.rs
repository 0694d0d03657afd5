//! Cancellable periodic background tasks
//!
//! The session expiry sweep and both registries' health-check loops run as
//! a [`PeriodicTask`]: a spawned Tokio task driven by `tokio::time::interval`
//! that exits when its [`CancellationToken`] fires, including in the middle
//! of a tick. [`PeriodicTask::stop`] cancels the token and awaits the task so
//! that resources it touches are released before shutdown continues.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to a running periodic task
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` every `period`, starting one period from now.
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in log output
    /// * `period` - Interval between ticks; zero is clamped to one second
    /// * `tick` - Factory producing the future run on each tick
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use parley::health::PeriodicTask;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let task = PeriodicTask::spawn("heartbeat", Duration::from_secs(5), || async {
    ///     tracing::debug!("tick");
    /// });
    /// task.stop().await;
    /// # }
    /// ```
    pub fn spawn<F, Fut>(name: &str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = if period.is_zero() {
            Duration::from_secs(1)
        } else {
            period
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let label = name.to_string();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                tracing::debug!(task = %label, "periodic task tick");
                // A tick in progress is abandoned at its next await point once cancelled.
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tick() => {}
                }
            }
            tracing::debug!(task = %label, "periodic task stopped");
        });

        Self {
            name: name.to_string(),
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(task = %self.name, "periodic task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let task = PeriodicTask::spawn("count", Duration::from_secs(10), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        task.stop().await;
        let seen = counter.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_slow_tick() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        let task = PeriodicTask::spawn("slow", Duration::from_secs(1), move || {
            let (s, f) = (Arc::clone(&s), Arc::clone(&f));
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                f.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        let before = tokio::time::Instant::now();
        task.stop().await;
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_one_period() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let task = PeriodicTask::spawn("delay", Duration::from_secs(60), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(task.name(), "delay");
        task.stop().await;
    }
}
