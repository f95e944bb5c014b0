//! Cancellable delayed task used to debounce flushes.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::error;

/// Runs a callback once `delay` has elapsed since the last (re)schedule.
///
/// Each call to [`DebounceTimer::reschedule`] aborts the pending task and
/// spawns a fresh one, so a steady stream of reschedules postpones the
/// callback until the stream goes quiet. The task is spawned on a captured
/// runtime handle, so scheduling works from threads outside the runtime.
/// The callback itself runs on the blocking pool, so it may do file IO
/// without stalling a runtime worker.
pub struct DebounceTimer {
    runtime: Handle,
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new(runtime: Handle, delay: Duration) -> Self {
        Self {
            runtime,
            delay,
            pending: None,
        }
    }

    /// Cancel any pending callback and schedule `callback` at now + delay.
    pub fn reschedule<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        let delay = self.delay;
        self.pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(callback).await {
                error!("Debounced callback failed: {}", e);
            }
        }));
    }

    /// Cancel the pending callback. Returns whether one was still waiting.
    ///
    /// A callback that has already started is not interrupted.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(task) => {
                let waiting = !task.is_finished();
                task.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = DebounceTimer::new(Handle::current(), Duration::from_secs(2));

        let fired_clone = Arc::clone(&fired);
        timer.reschedule(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_pending_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = DebounceTimer::new(Handle::current(), Duration::from_secs(2));

        for _ in 0..3 {
            let fired_clone = Arc::clone(&fired);
            timer.reschedule(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        // Only the last schedule survives
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = DebounceTimer::new(Handle::current(), Duration::from_secs(2));

        let fired_clone = Arc::clone(&fired);
        timer.reschedule(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_runs_off_the_runtime_thread() {
        let ran_on = Arc::new(std::sync::Mutex::new(None));
        let mut timer = DebounceTimer::new(Handle::current(), Duration::from_secs(1));

        let ran_on_clone = Arc::clone(&ran_on);
        timer.reschedule(move || {
            *ran_on_clone.lock().unwrap() = Some(std::thread::current().id());
        });
        tokio::time::sleep(Duration::from_secs(2)).await;

        let ran_on = *ran_on.lock().unwrap();
        assert!(ran_on.is_some());
        assert_ne!(ran_on, Some(std::thread::current().id()));
    }
}
