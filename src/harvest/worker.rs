use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::sources::{ArticleHarvester, ArticleOutcome};
use crate::db::{select_unprocessed_articles, Article, Database};
use crate::pool::{run_pool, PoolWorker};

/// One pool worker running link extraction.
pub struct ArticleWorker {
    db: Database,
    harvester: Arc<ArticleHarvester>,
}

impl ArticleWorker {
    #[must_use]
    pub fn new(db: Database, harvester: Arc<ArticleHarvester>) -> Self {
        Self { db, harvester }
    }
}

#[async_trait]
impl PoolWorker for ArticleWorker {
    type Item = Article;
    type Outcome = ArticleOutcome;

    fn describe(item: &Article) -> String {
        format!("article {}", item.id)
    }

    async fn process(&mut self, article: Article) -> Result<ArticleOutcome> {
        let links = self.harvester.discover(&article).await;

        // Only hold a connection for the writes, not the PDF download.
        let mut conn = self.db.acquire().await?;
        self.harvester.process(&mut conn, &article, &links).await
    }
}

/// Tally of one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub total: usize,
    pub with_links: usize,
    pub without_links: usize,
    pub repositories_created: usize,
    pub failed: usize,
    pub not_started: usize,
}

/// Extract repository links from every unprocessed article.
///
/// # Errors
///
/// Returns an error if the work list cannot be read. Per-article failures are
/// logged and counted; those articles stay unprocessed.
pub async fn run_extraction_pass(
    db: &Database,
    harvester: Arc<ArticleHarvester>,
    worker_count: usize,
    cancel: &CancellationToken,
) -> Result<ExtractionSummary> {
    let articles = {
        let mut conn = db.acquire().await?;
        select_unprocessed_articles(&mut conn)
            .await
            .context("Failed to load unprocessed articles")?
    };

    if articles.is_empty() {
        info!("No unprocessed articles");
        return Ok(ExtractionSummary::default());
    }

    info!(count = articles.len(), workers = worker_count, "Starting extraction pass");

    let workers = (0..worker_count)
        .map(|_| ArticleWorker::new(db.clone(), Arc::clone(&harvester)))
        .collect();
    let report = run_pool(workers, articles, cancel).await;

    let mut summary = ExtractionSummary {
        total: report.attempted() + report.not_started,
        failed: report.failed,
        not_started: report.not_started,
        ..ExtractionSummary::default()
    };
    for outcome in &report.outcomes {
        if outcome.repositories > 0 {
            summary.with_links += 1;
        } else {
            summary.without_links += 1;
        }
        summary.repositories_created += outcome.created;
    }

    info!(
        with_links = summary.with_links,
        without_links = summary.without_links,
        new_repositories = summary.repositories_created,
        failed = summary.failed,
        not_started = summary.not_started,
        "Extraction pass complete"
    );

    Ok(summary)
}
