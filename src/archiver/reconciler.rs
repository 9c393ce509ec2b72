use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqliteConnection;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pacer::SubmissionPacer;
use crate::config::Config;
use crate::db::{record_archived, record_submission_pending, ArchivalStatus, CodeRepository};
use crate::swh::{ArchiveService, CheckOutcome, SubmitOutcome};

/// Bounded retry budget for save requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Attempt `n` waits `n * backoff` before retrying.
    pub backoff: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_submit_retries,
            backoff: config.retry_backoff,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

/// What one reconciliation run did to a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Found in the archive; metadata recorded.
    Archived,
    /// Save request accepted; archival completes asynchronously.
    SubmissionPending,
    /// Re-check did not find it yet; still pending.
    StillPending,
    /// Nothing recorded; the next pass will try again.
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The archive refused the request in a way retrying cannot fix.
    Permanent(SubmitOutcome),
    /// Every attempt hit a transient error or the rate limit.
    RetriesExhausted { attempts: u32, last: SubmitOutcome },
    /// Shutdown was requested while waiting to submit.
    Cancelled { attempts: u32 },
}

enum SubmissionResult {
    Accepted { attempts: u32 },
    Permanent(SubmitOutcome),
    Exhausted { attempts: u32, last: SubmitOutcome },
    Cancelled { attempts: u32 },
}

/// Per-repository archival state machine.
///
/// Check always runs before Submit. Store writes are single statements so a
/// crash leaves either the old or the new state.
pub struct Reconciler {
    service: Arc<dyn ArchiveService>,
    retry: RetryPolicy,
    pacer: SubmissionPacer,
    cancel: CancellationToken,
}

impl Reconciler {
    #[must_use]
    pub fn new(service: Arc<dyn ArchiveService>, retry: RetryPolicy, pacer: SubmissionPacer) -> Self {
        Self {
            service,
            retry,
            pacer,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon pacing and backoff waits once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Check the repository and submit it when the archive lacks it.
    ///
    /// Repositories already pending are only re-checked.
    ///
    /// # Errors
    ///
    /// Returns an error only if a store write fails.
    pub async fn reconcile(
        &mut self,
        conn: &mut SqliteConnection,
        repo: &CodeRepository,
    ) -> Result<ReconcileOutcome> {
        if repo.status() == Some(ArchivalStatus::SubmissionPending) {
            return self.recheck(conn, repo).await;
        }

        match self.service.check(&repo.url).await {
            CheckOutcome::Found {
                last_visit,
                browse_url,
            } => {
                record_archived(conn, repo.id, browse_url.as_deref(), last_visit.as_deref()).await?;
                info!(
                    repo_id = repo.id,
                    url = %repo.url,
                    last_visit = last_visit.as_deref().unwrap_or("unknown"),
                    "Repository archived"
                );
                Ok(ReconcileOutcome::Archived)
            }
            CheckOutcome::NotFound => {
                debug!(repo_id = repo.id, url = %repo.url, "Not in archive, submitting");
                self.submit(conn, repo).await
            }
            CheckOutcome::Indeterminate(reason) => {
                warn!(repo_id = repo.id, url = %repo.url, %reason, "Archive check failed, submitting anyway");
                self.submit(conn, repo).await
            }
        }
    }

    /// Check a pending repository without submitting it again.
    ///
    /// # Errors
    ///
    /// Returns an error only if a store write fails.
    pub async fn recheck(
        &mut self,
        conn: &mut SqliteConnection,
        repo: &CodeRepository,
    ) -> Result<ReconcileOutcome> {
        match self.service.check(&repo.url).await {
            CheckOutcome::Found {
                last_visit,
                browse_url,
            } => {
                record_archived(conn, repo.id, browse_url.as_deref(), last_visit.as_deref()).await?;
                info!(repo_id = repo.id, url = %repo.url, "Pending repository now archived");
                Ok(ReconcileOutcome::Archived)
            }
            CheckOutcome::NotFound => {
                debug!(repo_id = repo.id, url = %repo.url, "Still awaiting archival");
                Ok(ReconcileOutcome::StillPending)
            }
            CheckOutcome::Indeterminate(reason) => {
                warn!(repo_id = repo.id, url = %repo.url, %reason, "Re-check failed");
                Ok(ReconcileOutcome::StillPending)
            }
        }
    }

    async fn submit(
        &mut self,
        conn: &mut SqliteConnection,
        repo: &CodeRepository,
    ) -> Result<ReconcileOutcome> {
        match self.submit_with_retry(&repo.url).await {
            SubmissionResult::Accepted { attempts } => {
                record_submission_pending(conn, repo.id).await?;
                info!(repo_id = repo.id, url = %repo.url, attempts, "Submission pending");
                Ok(ReconcileOutcome::SubmissionPending)
            }
            SubmissionResult::Permanent(outcome) => {
                error!(repo_id = repo.id, url = %repo.url, ?outcome, "Submission failed permanently");
                Ok(ReconcileOutcome::Failed(FailureReason::Permanent(outcome)))
            }
            SubmissionResult::Exhausted { attempts, last } => {
                warn!(
                    repo_id = repo.id,
                    url = %repo.url,
                    attempts,
                    ?last,
                    "Submission retries exhausted, will retry next pass"
                );
                Ok(ReconcileOutcome::Failed(FailureReason::RetriesExhausted {
                    attempts,
                    last,
                }))
            }
            SubmissionResult::Cancelled { attempts } => {
                info!(repo_id = repo.id, url = %repo.url, attempts, "Submission abandoned on shutdown");
                Ok(ReconcileOutcome::Failed(FailureReason::Cancelled { attempts }))
            }
        }
    }

    async fn submit_with_retry(&mut self, url: &str) -> SubmissionResult {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            if !self.pacer.wait(&self.cancel).await {
                return SubmissionResult::Cancelled { attempts: attempt };
            }
            attempt += 1;

            let outcome = self.service.submit(url).await;
            if outcome == SubmitOutcome::Accepted {
                return SubmissionResult::Accepted { attempts: attempt };
            }
            if !outcome.is_retryable() {
                return SubmissionResult::Permanent(outcome);
            }
            if attempt >= max_attempts {
                return SubmissionResult::Exhausted {
                    attempts: attempt,
                    last: outcome,
                };
            }

            let wait = self.retry.backoff_after(attempt);
            warn!(url = %url, attempt, ?outcome, wait_ms = wait.as_millis() as u64, "Submission deferred, backing off");
            tokio::select! {
                () = sleep(wait) => {}
                () = self.cancel.cancelled() => {
                    return SubmissionResult::Cancelled { attempts: attempt };
                }
            }
        }
    }
}
