//! Silence countdown timer
//!
//! Arms a cancellable countdown at each pause point; if no voice input
//! arrives before expiry the orchestrator auto-advances. Every armed
//! countdown carries a generation token so an expiry racing a cancel can
//! be recognized as stale and dropped: canceling generation N guarantees
//! no auto-advance is ever attributed to generation N, no matter how
//! close to expiry the cancel lands.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// Expiry notification posted to the orchestrator event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceElapsed {
    pub generation: u64,
}

/// Cancellable auto-advance countdown
///
/// At most one countdown is live per timer; arming cancels any prior one.
pub struct SilenceTimer {
    task: Option<tokio::task::JoinHandle<()>>,
    generation: u64,
    countdown_tx: watch::Sender<Option<u32>>,
}

impl SilenceTimer {
    pub fn new() -> Self {
        let (countdown_tx, _) = watch::channel(None);
        Self {
            task: None,
            generation: 0,
            countdown_tx,
        }
    }

    /// Remaining whole seconds, `None` while no countdown is armed
    pub fn countdown(&self) -> watch::Receiver<Option<u32>> {
        self.countdown_tx.subscribe()
    }

    /// Whether a countdown is currently live
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Arm the countdown, canceling any prior one
    ///
    /// The expiry fires after exactly `timeout`, including sub-second
    /// portions; the countdown channel publishes whole seconds remaining
    /// (rounded up) alongside. Returns the generation token the expiry
    /// event will carry.
    pub fn arm(&mut self, timeout: Duration, expiry_tx: mpsc::Sender<SilenceElapsed>) -> u64 {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;

        let countdown_tx = self.countdown_tx.clone();
        let _ = countdown_tx.send(Some(remaining_secs(timeout)));
        debug!(generation, ?timeout, "Silence timer armed");

        let task = tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let left = deadline.saturating_duration_since(tokio::time::Instant::now());
                if left.is_zero() {
                    break;
                }
                // Wake at the next whole-second display boundary, or at
                // the deadline if that comes first
                tokio::time::sleep(display_step(left)).await;
                let left = deadline.saturating_duration_since(tokio::time::Instant::now());
                if !left.is_zero() {
                    let remaining = remaining_secs(left);
                    trace!(generation, remaining, "Silence timer tick");
                    let _ = countdown_tx.send(Some(remaining));
                }
            }
            let _ = countdown_tx.send(None);
            debug!(generation, "Silence timer elapsed");
            let _ = expiry_tx.send(SilenceElapsed { generation }).await;
        });
        self.task = Some(task);
        generation
    }

    /// Cancel the live countdown, if any
    ///
    /// After this returns, no expiry for any previously armed generation
    /// will be delivered.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = self.countdown_tx.send(None);
            debug!(generation = self.generation, "Silence timer canceled");
        }
    }

    /// The most recently armed generation
    pub fn current_generation(&self) -> u64 {
        self.generation
    }

    /// Whether an expiry event belongs to the live countdown
    pub fn is_current(&self, elapsed: &SilenceElapsed) -> bool {
        self.task.is_some() && elapsed.generation == self.generation
    }

    /// Acknowledge a delivered expiry so the timer reads as disarmed
    pub fn acknowledge(&mut self, elapsed: &SilenceElapsed) {
        if elapsed.generation == self.generation {
            self.task = None;
        }
    }
}

/// Whole seconds remaining for display, rounded up so the countdown
/// never shows zero while time is still left
fn remaining_secs(left: Duration) -> u32 {
    left.as_secs_f64().ceil() as u32
}

/// Sleep step to the next whole-second boundary, capped at the deadline
fn display_step(left: Duration) -> Duration {
    let subsec = Duration::from_nanos(u64::from(left.subsec_nanos()));
    if subsec.is_zero() {
        Duration::from_secs(1).min(left)
    } else {
        subsec
    }
}

impl Default for SilenceTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SilenceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, pause, timeout as tokio_timeout};

    #[tokio::test]
    async fn test_expiry_carries_generation() {
        pause();
        let mut timer = SilenceTimer::new();
        let (tx, mut rx) = mpsc::channel(4);

        let generation = timer.arm(Duration::from_secs(4), tx);
        assert!(timer.is_armed());

        advance(Duration::from_secs(5)).await;
        let elapsed = rx.recv().await.unwrap();
        assert_eq!(elapsed.generation, generation);
        assert!(timer.is_current(&elapsed));

        timer.acknowledge(&elapsed);
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn test_cancel_prevents_expiry() {
        pause();
        let mut timer = SilenceTimer::new();
        let (tx, mut rx) = mpsc::channel(4);

        timer.arm(Duration::from_secs(4), tx);
        // Cancel 1s before expiry
        advance(Duration::from_secs(3)).await;
        timer.cancel();
        advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;

        // Aborting drops the sender, so the channel may read as closed;
        // what matters is that no expiry value was ever delivered
        assert!(
            !matches!(rx.try_recv(), Ok(_)),
            "canceled timer must not deliver expiry"
        );
        assert!(!timer.is_armed());
        assert_eq!(*timer.countdown().borrow(), None);
    }

    #[tokio::test]
    async fn test_subsecond_timeout_cancel_wins() {
        pause();
        let mut timer = SilenceTimer::new();
        let (tx, mut rx) = mpsc::channel(4);

        timer.arm(Duration::from_millis(200), tx);
        advance(Duration::from_millis(150)).await;
        timer.cancel();
        advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert!(
            !matches!(rx.try_recv(), Ok(_)),
            "cancel before a sub-second expiry must win"
        );
    }

    #[tokio::test]
    async fn test_subsecond_timeout_expires_after_full_duration() {
        pause();
        let mut timer = SilenceTimer::new();
        let (tx, mut rx) = mpsc::channel(4);

        let generation = timer.arm(Duration::from_millis(200), tx);

        // Not yet: only 150 of 200 ms have elapsed
        advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        advance(Duration::from_millis(100)).await;
        let elapsed = tokio_timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("expiry within bound")
            .expect("expiry delivered");
        assert_eq!(elapsed.generation, generation);
    }

    #[tokio::test]
    async fn test_rearm_invalidates_prior_generation() {
        pause();
        let mut timer = SilenceTimer::new();
        let (tx, mut rx) = mpsc::channel(4);

        let first = timer.arm(Duration::from_secs(2), tx.clone());
        let second = timer.arm(Duration::from_secs(2), tx);
        assert_ne!(first, second);

        advance(Duration::from_secs(3)).await;
        let elapsed = rx.recv().await.unwrap();
        assert_eq!(elapsed.generation, second);
        // A stale event for the first generation would be rejected
        assert!(!timer.is_current(&SilenceElapsed { generation: first }));
    }

    // start_paused keeps the paused clock aligned with the timer wheel's
    // millisecond base; pausing mid-test can leave sleeps firing 1ms late,
    // which desynchronizes the whole-second tick this test observes
    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_down() {
        let mut timer = SilenceTimer::new();
        let (tx, _rx) = mpsc::channel(4);
        let countdown = timer.countdown();

        timer.arm(Duration::from_secs(3), tx);
        assert_eq!(*countdown.borrow(), Some(3));
        // Let the countdown task register its first sleep before moving
        // the clock
        tokio::task::yield_now().await;

        advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(*countdown.borrow(), Some(2));

        advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(*countdown.borrow(), None);
    }

    #[tokio::test]
    async fn test_fractional_timeout_rounds_display_up() {
        pause();
        let mut timer = SilenceTimer::new();
        let (tx, mut rx) = mpsc::channel(4);
        let countdown = timer.countdown();

        timer.arm(Duration::from_millis(3500), tx);
        assert_eq!(*countdown.borrow(), Some(4));

        // The full 3.5 s elapses before expiry, not a truncated 3 s
        tokio::task::yield_now().await;
        advance(Duration::from_millis(3400)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        advance(Duration::from_millis(200)).await;
        assert!(rx.recv().await.is_some());
    }
}
