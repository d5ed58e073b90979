//! A rearmable single-shot timer used to shut the daemon down once no run
//! remains registered for a configured duration.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Fires `callback` once, `duration` after the most recent [`IdleTimer::reset`]
/// call, unless [`IdleTimer::cancel`] (or a later `reset`) intervenes first.
///
/// `reset`/`cancel` are linearized via a monotonically increasing generation
/// counter: each call bumps the generation and wakes the background task,
/// which re-reads the generation before firing so a stale countdown never
/// fires after a newer `reset` or a `cancel`.
pub struct IdleTimer {
    duration: Duration,
    generation: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for IdleTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleTimer")
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

/// Generation value meaning "no pending countdown" (set by `cancel`).
const CANCELLED: u64 = 0;

impl IdleTimer {
    /// Spawn the timer's background task and return a handle to it.
    ///
    /// The timer starts cancelled; call [`IdleTimer::reset`] to arm it.
    pub fn spawn<F>(duration: Duration, mut callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let generation = Arc::new(AtomicU64::new(CANCELLED));
        let notify = Arc::new(Notify::new());

        let task_generation = Arc::clone(&generation);
        let task_notify = Arc::clone(&notify);
        tokio::spawn(async move {
            loop {
                task_notify.notified().await;
                let mut my_generation = task_generation.load(Ordering::SeqCst);
                loop {
                    if my_generation == CANCELLED {
                        break;
                    }
                    tokio::select! {
                        () = tokio::time::sleep(duration) => {
                            if task_generation.compare_exchange(
                                my_generation,
                                CANCELLED,
                                Ordering::SeqCst,
                                Ordering::SeqCst,
                            ).is_ok() {
                                callback();
                            }
                            break;
                        }
                        () = task_notify.notified() => {
                            my_generation = task_generation.load(Ordering::SeqCst);
                        }
                    }
                }
            }
        });

        Self {
            duration,
            generation,
            notify,
        }
    }

    /// Cancel any pending firing and schedule `callback` after `self.duration`.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Cancel any pending firing; the callback does not run until the next `reset`.
    pub fn cancel(&self) {
        self.generation.store(CANCELLED, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// The configured fire duration.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration_once_reset() {
        let fired = Arc::new(AtomicU64::new(0));
        let fired_clone = Arc::clone(&fired);
        let timer = IdleTimer::spawn(Duration::from_millis(50), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        timer.reset();
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_firing() {
        let fired = Arc::new(AtomicU64::new(0));
        let fired_clone = Arc::clone(&fired);
        let timer = IdleTimer::spawn(Duration::from_millis(50), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        timer.reset();
        timer.cancel();
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_before_fire_restarts_countdown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let timer = IdleTimer::spawn(Duration::from_millis(100), move || {
            log_clone.lock().expect("lock").push(());
        });

        timer.reset();
        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        timer.reset();
        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert!(log.lock().expect("lock").is_empty());

        tokio::time::advance(Duration::from_millis(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(log.lock().expect("lock").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_after_fire_is_legal() {
        let fired = Arc::new(AtomicU64::new(0));
        let fired_clone = Arc::clone(&fired);
        let timer = IdleTimer::spawn(Duration::from_millis(30), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        timer.reset();
        tokio::time::advance(Duration::from_millis(40)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        timer.reset();
        tokio::time::advance(Duration::from_millis(40)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
