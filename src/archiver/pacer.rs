//! Submission pacing for archive workers.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Keeps one worker's save requests at least `interval` apart.
///
/// Each worker owns its own pacer; the interval is derived from the hourly
/// request ceiling so that workers self-pace without shared state.
#[derive(Debug)]
pub struct SubmissionPacer {
    interval: Duration,
    last_submission: Option<Instant>,
}

impl SubmissionPacer {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_submission: None,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next submission is allowed, then claim the slot.
    ///
    /// Returns `false` without claiming the slot if `cancel` fires first.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if let Some(last) = self.last_submission {
            tokio::select! {
                () = sleep_until(last + self.interval) => {}
                () = cancel.cancelled() => return false,
            }
        }
        self.last_submission = Some(Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_submission_is_immediate() {
        let mut pacer = SubmissionPacer::new(Duration::from_secs(3));
        let start = Instant::now();
        assert!(pacer.wait(&live()).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_submissions_are_spaced() {
        let mut pacer = SubmissionPacer::new(Duration::from_secs(3));
        let start = Instant::now();
        assert!(pacer.wait(&live()).await);
        assert!(pacer.wait(&live()).await);
        assert!(pacer.wait(&live()).await);
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert!(start.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_time_counts_towards_interval() {
        let mut pacer = SubmissionPacer::new(Duration::from_secs(3));
        assert!(pacer.wait(&live()).await);
        tokio::time::sleep(Duration::from_secs(5)).await;

        let before = Instant::now();
        assert!(pacer.wait(&live()).await);
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let mut pacer = SubmissionPacer::new(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        assert!(pacer.wait(&cancel).await);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        assert!(!pacer.wait(&cancel).await);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_does_not_claim_slot() {
        let mut pacer = SubmissionPacer::new(Duration::from_secs(3));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!pacer.wait(&cancel).await);

        // No slot was claimed, so a live wait is still immediate.
        let start = Instant::now();
        assert!(pacer.wait(&live()).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
