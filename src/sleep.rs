//! Sleep timer: a one-shot deadline that stops playback.
//!
//! The timer is a single resettable [`Sleep`]. Arming resets it to the new
//! deadline, so there is never more than one pending firing; cancelling
//! only forgets the deadline. The owner awaits [`SleepTimer::expired`] in
//! its event loop and pauses playback when it resolves.
//!
//! ```text
//! Idle --arm--> Armed(deadline) --expired/cancel--> Idle
//!                 |  ^
//!                 +--+ arm (replaces the deadline)
//! ```

use std::{future, pin::Pin, time::Duration};

use tokio::time::{sleep_until, Instant, Sleep};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Armed {
    deadline: Instant,
    minutes: u32,
}

/// One-shot sleep timer.
#[derive(Debug, Default)]
pub struct SleepTimer {
    /// Created on first use so that the timer can be constructed outside of
    /// a runtime.
    sleep: Option<Pin<Box<Sleep>>>,
    armed: Option<Armed>,
}

impl SleepTimer {
    /// Durations offered to the user, in minutes.
    pub const PRESETS: [u32; 4] = [15, 30, 60, 90];

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer to fire `minutes` from now, replacing any pending
    /// deadline. Returns the new deadline.
    pub fn arm(&mut self, minutes: u32) -> Instant {
        let deadline = Instant::now() + Duration::from_secs(u64::from(minutes) * 60);
        match &mut self.sleep {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(sleep_until(deadline))),
        }

        self.armed = Some(Armed { deadline, minutes });
        deadline
    }

    /// Cancels the pending firing, if any. Idempotent.
    pub fn cancel(&mut self) {
        self.armed = None;
    }

    /// Time until the timer fires; zero when idle.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.armed.map_or(Duration::ZERO, |armed| {
            armed.deadline.saturating_duration_since(Instant::now())
        })
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.armed.map(|armed| armed.deadline)
    }

    /// The preset the timer was armed with.
    #[must_use]
    pub fn minutes(&self) -> Option<u32> {
        self.armed.map(|armed| armed.minutes)
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Resolves when the armed deadline passes and returns the timer to
    /// idle. Never resolves while idle.
    ///
    /// Cancel safe: dropping the future before it resolves leaves the timer
    /// armed.
    pub async fn expired(&mut self) {
        match (self.armed, self.sleep.as_mut()) {
            (Some(_), Some(sleep)) => sleep.as_mut().await,
            _ => future::pending::<()>().await,
        }

        self.armed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::{advance, timeout};

    #[test]
    fn idle_timer_has_nothing_remaining() {
        let timer = SleepTimer::new();
        assert!(!timer.is_armed());
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_deadline() {
        let start = Instant::now();
        let mut timer = SleepTimer::new();
        timer.arm(15);
        assert_eq!(timer.minutes(), Some(15));
        assert_eq!(timer.remaining(), Duration::from_secs(15 * 60));

        timer.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(15 * 60));
        assert!(!timer.is_armed());
        assert_eq!(timer.remaining(), Duration::ZERO);

        // Idle again: no second firing.
        assert!(timeout(Duration::from_secs(3600), timer.expired())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_deadline() {
        let start = Instant::now();
        let mut timer = SleepTimer::new();
        timer.arm(1);
        timer.arm(2);
        assert_eq!(timer.minutes(), Some(2));

        timer.expired().await;
        assert!(start.elapsed() >= Duration::from_secs(120));

        assert!(timeout(Duration::from_secs(3600), timer.expired())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_clears_remaining() {
        let mut timer = SleepTimer::new();
        timer.arm(1);
        advance(Duration::from_secs(30)).await;
        assert_eq!(timer.remaining(), Duration::from_secs(30));

        timer.cancel();
        timer.cancel();
        assert_eq!(timer.remaining(), Duration::ZERO);
        assert!(timeout(Duration::from_secs(120), timer.expired())
            .await
            .is_err());
    }
}
