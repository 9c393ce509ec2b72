use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::pacer::SubmissionPacer;
use super::reconciler::{ReconcileOutcome, Reconciler, RetryPolicy};
use crate::config::Config;
use crate::db::{select_pending_repositories, select_unarchived_repositories, CodeRepository, Database};
use crate::pool::{run_pool, PoolReport, PoolWorker};
use crate::swh::ArchiveService;

/// Which repositories a pass visits and what it may do to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// `not_submitted` repositories: check, then submit if missing.
    Reconcile,
    /// `submission_pending` repositories: check only.
    Recheck,
}

/// One pool worker driving the reconciler.
pub struct ReconcileWorker {
    db: Database,
    reconciler: Reconciler,
    kind: PassKind,
}

impl ReconcileWorker {
    #[must_use]
    pub fn new(db: Database, reconciler: Reconciler, kind: PassKind) -> Self {
        Self {
            db,
            reconciler,
            kind,
        }
    }
}

#[async_trait]
impl PoolWorker for ReconcileWorker {
    type Item = CodeRepository;
    type Outcome = ReconcileOutcome;

    fn describe(item: &CodeRepository) -> String {
        item.url.clone()
    }

    async fn process(&mut self, repo: CodeRepository) -> Result<ReconcileOutcome> {
        let mut conn = self.db.acquire().await?;
        match self.kind {
            PassKind::Reconcile => self.reconciler.reconcile(&mut conn, &repo).await,
            PassKind::Recheck => self.reconciler.recheck(&mut conn, &repo).await,
        }
    }
}

/// Tally of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub total: usize,
    pub archived: usize,
    pub pending: usize,
    pub failed: usize,
    pub not_started: usize,
}

impl From<&PoolReport<ReconcileOutcome>> for PassSummary {
    fn from(report: &PoolReport<ReconcileOutcome>) -> Self {
        let mut summary = Self {
            total: report.attempted() + report.not_started,
            failed: report.failed,
            not_started: report.not_started,
            ..Self::default()
        };

        for outcome in &report.outcomes {
            match outcome {
                ReconcileOutcome::Archived => summary.archived += 1,
                ReconcileOutcome::SubmissionPending | ReconcileOutcome::StillPending => {
                    summary.pending += 1;
                }
                ReconcileOutcome::Failed(_) => summary.failed += 1,
            }
        }

        summary
    }
}

/// Run one reconciliation or re-check pass over the store.
///
/// # Errors
///
/// Returns an error if the work list cannot be read. Per-repository failures
/// are logged and counted, never returned.
pub async fn run_archive_pass(
    db: &Database,
    service: Arc<dyn ArchiveService>,
    config: &Config,
    kind: PassKind,
    cancel: &CancellationToken,
) -> Result<PassSummary> {
    let repos = {
        let mut conn = db.acquire().await?;
        let repos = match kind {
            PassKind::Reconcile => select_unarchived_repositories(&mut conn).await,
            PassKind::Recheck => select_pending_repositories(&mut conn).await,
        };
        repos.context("Failed to load repositories for archive pass")?
    };

    if repos.is_empty() {
        info!(?kind, "No repositories to process");
        return Ok(PassSummary::default());
    }

    info!(?kind, count = repos.len(), workers = config.worker_concurrency, "Starting archive pass");

    let retry = RetryPolicy::from_config(config);
    let workers = (0..config.worker_concurrency)
        .map(|_| {
            let reconciler = Reconciler::new(
                Arc::clone(&service),
                retry,
                SubmissionPacer::new(config.submission_interval()),
            )
            .with_cancellation(cancel.clone());
            ReconcileWorker::new(db.clone(), reconciler, kind)
        })
        .collect();

    let report = run_pool(workers, repos, cancel).await;
    let summary = PassSummary::from(&report);

    info!(
        ?kind,
        archived = summary.archived,
        pending = summary.pending,
        failed = summary.failed,
        not_started = summary.not_started,
        "Archive pass complete"
    );

    Ok(summary)
}
