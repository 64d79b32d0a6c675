//! One-shot deadline timer.
//!
//! At most one timer task is pending per watchdog. Re-arming aborts the
//! previous task first, and dropping the watchdog aborts whatever is left.

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::WizardError;

/// Outcome of arming the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// No deadline set
    Inert,
    /// Timer pending, fires after the given delay
    Armed(std::time::Duration),
    /// Deadline already passed; the expiry action ran synchronously
    Expired,
}

#[derive(Debug, Default)]
pub struct DeadlineWatchdog {
    handle: Option<JoinHandle<()>>,
}

impl DeadlineWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_expire` for `deadline`, measured from `now`.
    ///
    /// Any pending timer is cancelled first. A deadline at or before `now`
    /// runs `on_expire` before returning. Scheduling a future deadline
    /// requires a tokio runtime.
    pub fn arm<F>(
        &mut self,
        deadline: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        on_expire: F,
    ) -> Result<WatchdogState, WizardError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();

        let Some(deadline) = deadline else {
            return Ok(WatchdogState::Inert);
        };

        let remaining = deadline - now;
        if remaining <= chrono::Duration::zero() {
            tracing::info!(deadline = %deadline, "session deadline already passed");
            on_expire();
            return Ok(WatchdogState::Expired);
        }

        let delay = remaining.to_std().unwrap_or(std::time::Duration::ZERO);
        let runtime = Handle::try_current().map_err(|_| WizardError::NoRuntime)?;
        // anchored at arm time
        let fire_at = Instant::now() + delay;
        self.handle = Some(runtime.spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            tracing::info!(deadline = %deadline, "session deadline reached");
            on_expire();
        }));
        tracing::debug!(delay_secs = delay.as_secs(), "deadline watchdog armed");

        Ok(WatchdogState::Armed(delay))
    }

    /// Abort the pending timer, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DeadlineWatchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        (fired, move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_no_deadline_is_inert() {
        let mut watchdog = DeadlineWatchdog::new();
        let (fired, on_expire) = counter();

        let state = watchdog.arm(None, Utc::now(), on_expire).unwrap();
        assert_eq!(state, WatchdogState::Inert);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!watchdog.is_armed());
    }

    #[test]
    fn test_past_deadline_fires_synchronously_without_runtime() {
        let mut watchdog = DeadlineWatchdog::new();
        let (fired, on_expire) = counter();
        let now = Utc::now();

        let state = watchdog
            .arm(Some(now - chrono::Duration::seconds(1)), now, on_expire)
            .unwrap();
        assert_eq!(state, WatchdogState::Expired);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deadline_equal_to_now_is_expired() {
        let mut watchdog = DeadlineWatchdog::new();
        let (fired, on_expire) = counter();
        let now = Utc::now();

        let state = watchdog.arm(Some(now), now, on_expire).unwrap();
        assert_eq!(state, WatchdogState::Expired);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_future_deadline_needs_runtime() {
        let mut watchdog = DeadlineWatchdog::new();
        let (_fired, on_expire) = counter();
        let now = Utc::now();

        let err = watchdog
            .arm(Some(now + chrono::Duration::seconds(60)), now, on_expire)
            .unwrap_err();
        assert!(matches!(err, WizardError::NoRuntime));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let mut watchdog = DeadlineWatchdog::new();
        let (fired, on_expire) = counter();
        let now = Utc::now();

        let state = watchdog
            .arm(Some(now + chrono::Duration::seconds(30)), now, on_expire)
            .unwrap();
        assert_eq!(state, WatchdogState::Armed(Duration::from_secs(30)));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_counts_from_arm_not_first_poll() {
        let mut watchdog = DeadlineWatchdog::new();
        let (fired, on_expire) = counter();
        let now = Utc::now();
        let armed_at = tokio::time::Instant::now();

        watchdog
            .arm(Some(now + chrono::Duration::seconds(300)), now, on_expire)
            .unwrap();

        // clock moves before the timer task is ever polled
        tokio::time::advance(Duration::from_secs(240)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        while fired.load(Ordering::SeqCst) == 0 {
            assert!(armed_at.elapsed() <= Duration::from_secs(310), "timer fired late");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert!(armed_at.elapsed() >= Duration::from_secs(300));
        assert!(armed_at.elapsed() <= Duration::from_secs(301));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_previous_timer() {
        let mut watchdog = DeadlineWatchdog::new();
        let (first, on_first) = counter();
        let (second, on_second) = counter();
        let now = Utc::now();

        watchdog
            .arm(Some(now + chrono::Duration::seconds(10)), now, on_first)
            .unwrap();
        watchdog
            .arm(Some(now + chrono::Duration::seconds(20)), now, on_second)
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timer() {
        let (fired, on_expire) = counter();
        let now = Utc::now();
        {
            let mut watchdog = DeadlineWatchdog::new();
            watchdog
                .arm(Some(now + chrono::Duration::seconds(5)), now, on_expire)
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
