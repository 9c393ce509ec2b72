//! Integration tests for archive reconciliation with a scripted archive.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use preprint_repo_archiver::archiver::{
    run_archive_pass, FailureReason, PassKind, ReconcileOutcome, Reconciler, RetryPolicy,
    SubmissionPacer,
};
use preprint_repo_archiver::config::Config;
use preprint_repo_archiver::db::{
    get_repository, upsert_repository, ArchivalStatus, Database,
};
use preprint_repo_archiver::swh::{ArchiveService, CheckOutcome, SubmitOutcome};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path, 8)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

/// Archive double that replays queued answers and records every call.
#[derive(Default)]
struct ScriptedArchive {
    checks: Mutex<VecDeque<CheckOutcome>>,
    submits: Mutex<VecDeque<SubmitOutcome>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedArchive {
    fn with(checks: Vec<CheckOutcome>, submits: Vec<SubmitOutcome>) -> Arc<Self> {
        Arc::new(Self {
            checks: Mutex::new(checks.into()),
            submits: Mutex::new(submits.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn submit_count(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("submit")).count()
    }
}

#[async_trait]
impl ArchiveService for ScriptedArchive {
    async fn check(&self, url: &str) -> CheckOutcome {
        self.calls.lock().unwrap().push(format!("check {url}"));
        self.checks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CheckOutcome::NotFound)
    }

    async fn submit(&self, url: &str) -> SubmitOutcome {
        self.calls.lock().unwrap().push(format!("submit {url}"));
        self.submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SubmitOutcome::Accepted)
    }
}

fn reconciler(service: Arc<ScriptedArchive>) -> Reconciler {
    Reconciler::new(
        service,
        RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(5),
        },
        SubmissionPacer::new(Duration::ZERO),
    )
}

async fn status_of(db: &Database, id: i64) -> ArchivalStatus {
    let mut conn = db.acquire().await.unwrap();
    get_repository(&mut conn, id)
        .await
        .unwrap()
        .unwrap()
        .status()
        .unwrap()
}

#[tokio::test]
async fn test_found_records_archived_without_submitting() {
    let (db, _temp_dir) = setup_db().await;
    let mut conn = db.acquire().await.unwrap();
    let repo = upsert_repository(&mut conn, "https://github.com/a/found").await.unwrap();
    let stored = get_repository(&mut conn, repo.id).await.unwrap().unwrap();

    let archive = ScriptedArchive::with(
        vec![CheckOutcome::Found {
            last_visit: Some("2024-01-01T00:00:00+00:00".to_string()),
            browse_url: Some("https://archive.example/browse/origin/x/".to_string()),
        }],
        vec![],
    );

    let outcome = reconciler(Arc::clone(&archive))
        .reconcile(&mut conn, &stored)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Archived);
    assert_eq!(archive.submit_count(), 0);

    let updated = get_repository(&mut conn, repo.id).await.unwrap().unwrap();
    assert_eq!(updated.status(), Some(ArchivalStatus::Archived));
    assert_eq!(
        updated.archive_link.as_deref(),
        Some("https://archive.example/browse/origin/x/")
    );
    assert_eq!(
        updated.archive_last_visit.as_deref(),
        Some("2024-01-01T00:00:00+00:00")
    );
}

#[tokio::test]
async fn test_not_found_then_pending_then_archived() {
    let (db, _temp_dir) = setup_db().await;
    let mut conn = db.acquire().await.unwrap();
    let repo = upsert_repository(&mut conn, "https://github.com/a/new").await.unwrap();

    let archive = ScriptedArchive::with(
        vec![
            CheckOutcome::NotFound,
            CheckOutcome::Found {
                last_visit: Some("2024-05-05T00:00:00+00:00".to_string()),
                browse_url: None,
            },
        ],
        vec![SubmitOutcome::Accepted],
    );
    let mut reconciler = reconciler(Arc::clone(&archive));

    let stored = get_repository(&mut conn, repo.id).await.unwrap().unwrap();
    let first = reconciler.reconcile(&mut conn, &stored).await.unwrap();
    assert_eq!(first, ReconcileOutcome::SubmissionPending);
    drop(conn);
    assert_eq!(status_of(&db, repo.id).await, ArchivalStatus::SubmissionPending);

    // A later pass only re-checks a pending repository.
    let mut conn = db.acquire().await.unwrap();
    let stored = get_repository(&mut conn, repo.id).await.unwrap().unwrap();
    let second = reconciler.reconcile(&mut conn, &stored).await.unwrap();
    assert_eq!(second, ReconcileOutcome::Archived);
    drop(conn);
    assert_eq!(status_of(&db, repo.id).await, ArchivalStatus::Archived);

    assert_eq!(
        archive.calls(),
        vec![
            "check https://github.com/a/new",
            "submit https://github.com/a/new",
            "check https://github.com/a/new",
        ]
    );
}

#[tokio::test]
async fn test_rate_limited_three_times_then_accepted() {
    let (db, _temp_dir) = setup_db().await;
    let mut conn = db.acquire().await.unwrap();
    let repo = upsert_repository(&mut conn, "https://github.com/a/busy").await.unwrap();
    let stored = get_repository(&mut conn, repo.id).await.unwrap().unwrap();

    let archive = ScriptedArchive::with(
        vec![CheckOutcome::NotFound],
        vec![
            SubmitOutcome::RateLimited,
            SubmitOutcome::RateLimited,
            SubmitOutcome::RateLimited,
            SubmitOutcome::Accepted,
        ],
    );

    let outcome = reconciler(Arc::clone(&archive))
        .reconcile(&mut conn, &stored)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::SubmissionPending);
    assert_eq!(archive.submit_count(), 4);
    drop(conn);
    assert_eq!(status_of(&db, repo.id).await, ArchivalStatus::SubmissionPending);
}

#[tokio::test]
async fn test_unauthorized_is_permanent_and_changes_nothing() {
    let (db, _temp_dir) = setup_db().await;
    let mut conn = db.acquire().await.unwrap();
    let repo = upsert_repository(&mut conn, "https://github.com/a/denied").await.unwrap();
    let stored = get_repository(&mut conn, repo.id).await.unwrap().unwrap();

    let archive = ScriptedArchive::with(vec![CheckOutcome::NotFound], vec![SubmitOutcome::Unauthorized]);

    let outcome = reconciler(Arc::clone(&archive))
        .reconcile(&mut conn, &stored)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Failed(FailureReason::Permanent(SubmitOutcome::Unauthorized))
    );
    assert_eq!(archive.submit_count(), 1);
    drop(conn);
    assert_eq!(status_of(&db, repo.id).await, ArchivalStatus::NotSubmitted);
}

#[tokio::test]
async fn test_retries_exhausted_leaves_repository_for_next_pass() {
    let (db, _temp_dir) = setup_db().await;
    let mut conn = db.acquire().await.unwrap();
    let repo = upsert_repository(&mut conn, "https://github.com/a/flaky").await.unwrap();
    let stored = get_repository(&mut conn, repo.id).await.unwrap().unwrap();

    let archive = ScriptedArchive::with(
        vec![CheckOutcome::NotFound],
        vec![SubmitOutcome::Transient("HTTP 503".to_string()); 5],
    );

    let outcome = reconciler(Arc::clone(&archive))
        .reconcile(&mut conn, &stored)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Failed(FailureReason::RetriesExhausted {
            attempts: 4,
            last: SubmitOutcome::Transient("HTTP 503".to_string()),
        })
    );
    assert_eq!(archive.submit_count(), 4);
    drop(conn);
    assert_eq!(status_of(&db, repo.id).await, ArchivalStatus::NotSubmitted);
}

fn cancel_after(delay: Duration) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
    });
    cancel
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff() {
    let (db, _temp_dir) = setup_db().await;
    let mut conn = db.acquire().await.unwrap();
    let repo = upsert_repository(&mut conn, "https://github.com/a/slow").await.unwrap();
    let stored = get_repository(&mut conn, repo.id).await.unwrap().unwrap();

    let archive = ScriptedArchive::with(
        vec![CheckOutcome::NotFound],
        vec![SubmitOutcome::RateLimited; 4],
    );
    let mut reconciler = Reconciler::new(
        Arc::<ScriptedArchive>::clone(&archive),
        RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_secs(60),
        },
        SubmissionPacer::new(Duration::ZERO),
    )
    .with_cancellation(cancel_after(Duration::from_millis(50)));

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        reconciler.reconcile(&mut conn, &stored),
    )
    .await
    .expect("backoff should end on shutdown")
    .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Failed(FailureReason::Cancelled { attempts: 1 })
    );
    assert_eq!(archive.submit_count(), 1);
    drop(conn);
    assert_eq!(status_of(&db, repo.id).await, ArchivalStatus::NotSubmitted);
}

#[tokio::test]
async fn test_shutdown_interrupts_pacing() {
    let (db, _temp_dir) = setup_db().await;
    let mut conn = db.acquire().await.unwrap();
    let repo = upsert_repository(&mut conn, "https://github.com/a/paced").await.unwrap();
    let stored = get_repository(&mut conn, repo.id).await.unwrap().unwrap();

    let archive = ScriptedArchive::with(
        vec![CheckOutcome::NotFound],
        vec![SubmitOutcome::Transient("HTTP 502".to_string()); 4],
    );
    let mut reconciler = Reconciler::new(
        Arc::<ScriptedArchive>::clone(&archive),
        RetryPolicy {
            max_retries: 3,
            backoff: Duration::ZERO,
        },
        SubmissionPacer::new(Duration::from_secs(3600)),
    )
    .with_cancellation(cancel_after(Duration::from_millis(50)));

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        reconciler.reconcile(&mut conn, &stored),
    )
    .await
    .expect("pacing should end on shutdown")
    .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Failed(FailureReason::Cancelled { attempts: 1 })
    );
    assert_eq!(archive.submit_count(), 1);
    drop(conn);
    assert_eq!(status_of(&db, repo.id).await, ArchivalStatus::NotSubmitted);
}

#[tokio::test]
async fn test_indeterminate_check_still_submits() {
    let (db, _temp_dir) = setup_db().await;
    let mut conn = db.acquire().await.unwrap();
    let repo = upsert_repository(&mut conn, "https://gitlab.com/g/p").await.unwrap();
    let stored = get_repository(&mut conn, repo.id).await.unwrap().unwrap();

    let archive = ScriptedArchive::with(
        vec![CheckOutcome::Indeterminate("timeout".to_string())],
        vec![SubmitOutcome::Accepted],
    );

    let outcome = reconciler(Arc::clone(&archive))
        .reconcile(&mut conn, &stored)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::SubmissionPending);
    assert_eq!(archive.submit_count(), 1);
}

#[tokio::test]
async fn test_recheck_never_submits() {
    let (db, _temp_dir) = setup_db().await;
    let mut conn = db.acquire().await.unwrap();
    let repo = upsert_repository(&mut conn, "https://github.com/a/wait").await.unwrap();
    let stored = get_repository(&mut conn, repo.id).await.unwrap().unwrap();

    let archive = ScriptedArchive::with(vec![CheckOutcome::NotFound], vec![]);

    let outcome = reconciler(Arc::clone(&archive))
        .recheck(&mut conn, &stored)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::StillPending);
    assert_eq!(archive.submit_count(), 0);
}

#[tokio::test]
async fn test_archive_pass_over_store() {
    let (db, _temp_dir) = setup_db().await;
    let mut ids = Vec::new();
    {
        let mut conn = db.acquire().await.unwrap();
        for i in 0..6 {
            let repo = upsert_repository(&mut conn, &format!("https://github.com/pass/r{i}"))
                .await
                .unwrap();
            ids.push(repo.id);
        }
    }

    // Every check misses and every submission is accepted.
    let archive = ScriptedArchive::with(vec![], vec![]);
    let config = Config::for_testing();
    let cancel = CancellationToken::new();

    let summary = run_archive_pass(&db, archive.clone(), &config, PassKind::Reconcile, &cancel)
        .await
        .unwrap();

    assert_eq!(summary.total, 6);
    assert_eq!(summary.pending, 6);
    assert_eq!(summary.failed, 0);
    assert_eq!(archive.submit_count(), 6);
    for id in &ids {
        assert_eq!(status_of(&db, *id).await, ArchivalStatus::SubmissionPending);
    }

    // Nothing left for a second reconcile pass; the recheck pass picks them up.
    let again = run_archive_pass(&db, archive.clone(), &config, PassKind::Reconcile, &cancel)
        .await
        .unwrap();
    assert_eq!(again.total, 0);

    let recheck = run_archive_pass(&db, archive.clone(), &config, PassKind::Recheck, &cancel)
        .await
        .unwrap();
    assert_eq!(recheck.total, 6);
    assert_eq!(recheck.pending, 6);
    assert_eq!(archive.submit_count(), 6);
}

#[tokio::test]
async fn test_cancelled_pass_touches_nothing() {
    let (db, _temp_dir) = setup_db().await;
    let id = {
        let mut conn = db.acquire().await.unwrap();
        upsert_repository(&mut conn, "https://github.com/c/x").await.unwrap().id
    };

    let archive = ScriptedArchive::with(vec![], vec![]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = run_archive_pass(
        &db,
        Arc::<ScriptedArchive>::clone(&archive),
        &Config::for_testing(),
        PassKind::Reconcile,
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(summary.not_started, 1);
    assert!(archive.calls().is_empty());
    assert_eq!(status_of(&db, id).await, ArchivalStatus::NotSubmitted);
}
