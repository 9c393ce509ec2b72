//! Archive reconciliation: make sure every discovered repository ends up in
//! Software Heritage.

pub mod pacer;
pub mod reconciler;
pub mod worker;

pub use pacer::SubmissionPacer;
pub use reconciler::{FailureReason, ReconcileOutcome, Reconciler, RetryPolicy};
pub use worker::{run_archive_pass, PassKind, PassSummary, ReconcileWorker};
