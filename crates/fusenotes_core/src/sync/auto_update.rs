//! Replaceable fixed-delay timer driving recurring sync runs.
//!
//! # Responsibility
//! - Run a task after an initial delay, then again `interval` after each run
//!   completes.
//! - Replace, never stack, timers when started twice.
//!
//! # Invariants
//! - At most one timer is active; start and stop serialize on one lock.
//! - Stopping aborts the timer task without waiting for an in-flight run.

use log::info;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

struct ActiveTimer {
    handle: JoinHandle<()>,
    interval: Duration,
}

#[derive(Default)]
pub struct AutoUpdate {
    active: Mutex<Option<ActiveTimer>>,
}

impl AutoUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any running timer and schedules `run` on `runtime`.
    pub fn start<F, Fut>(&self, runtime: &Handle, interval: Duration, initial_delay: Duration, run: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.handle.abort();
        }

        let handle = runtime.spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                run().await;
                tokio::time::sleep(interval).await;
            }
        });
        *active = Some(ActiveTimer { handle, interval });

        info!(
            "event=sync_schedule module=sync status=ok interval_ms={} initial_delay_ms={}",
            interval.as_millis(),
            initial_delay.as_millis()
        );
    }

    /// Cancels the running timer, if any. Returns whether one was active.
    pub fn stop(&self) -> bool {
        let stopped = self.active.lock().take();
        match stopped {
            Some(timer) => {
                timer.handle.abort();
                info!("event=sync_schedule module=sync status=stopped");
                true
            }
            None => false,
        }
    }

    /// Interval of the active timer.
    pub fn interval(&self) -> Option<Duration> {
        self.active
            .lock()
            .as_ref()
            .filter(|timer| !timer.handle.is_finished())
            .map(|timer| timer.interval)
    }
}

impl Drop for AutoUpdate {
    fn drop(&mut self) {
        if let Some(timer) = self.active.get_mut().take() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AutoUpdate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap()
    }

    #[test]
    fn restart_replaces_the_active_timer() {
        let runtime = runtime();
        let timer = AutoUpdate::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        timer.start(
            runtime.handle(),
            Duration::from_secs(5),
            Duration::ZERO,
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );
        timer.start(
            runtime.handle(),
            Duration::from_secs(10),
            Duration::from_secs(60),
            || async {},
        );

        assert_eq!(timer.interval(), Some(Duration::from_secs(10)));
        assert!(timer.stop());
        assert!(!timer.stop());
        assert_eq!(timer.interval(), None);
    }

    #[test]
    fn runs_repeat_with_fixed_delay() {
        let runtime = runtime();
        let timer = AutoUpdate::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        timer.start(
            runtime.handle(),
            Duration::from_millis(10),
            Duration::ZERO,
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        std::thread::sleep(Duration::from_millis(200));
        timer.stop();
        let observed = runs.load(Ordering::SeqCst);
        assert!(observed >= 2, "expected repeated runs, got {observed}");

        std::thread::sleep(Duration::from_millis(50));
        let after_stop = runs.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }
}
