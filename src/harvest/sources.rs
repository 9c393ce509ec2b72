use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::config::SourcePolicy;
use crate::db::{link_article_to_repository, mark_article_processed, upsert_repository, Article};
use crate::links::LinkExtractor;
use crate::pdf::{scan_pdf, PdfScan, PdfTextSource};

/// What extraction did for one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleOutcome {
    pub article_id: i64,
    /// Repositories linked to the article.
    pub repositories: usize,
    /// Of those, how many were seen for the first time.
    pub created: usize,
}

/// Finds repository links for an article and records them.
pub struct ArticleHarvester {
    extractor: Arc<LinkExtractor>,
    pdf_source: Arc<dyn PdfTextSource>,
    policy: SourcePolicy,
    pdf_budget: Option<Duration>,
}

impl ArticleHarvester {
    #[must_use]
    pub fn new(
        extractor: Arc<LinkExtractor>,
        pdf_source: Arc<dyn PdfTextSource>,
        policy: SourcePolicy,
        pdf_budget: Option<Duration>,
    ) -> Self {
        Self {
            extractor,
            pdf_source,
            policy,
            pdf_budget,
        }
    }

    /// Collect repository URLs from the article's abstract and PDF.
    ///
    /// Never fails: an unreadable PDF or a missing abstract just contributes
    /// nothing.
    pub async fn discover(&self, article: &Article) -> BTreeSet<String> {
        let from_abstract = article
            .abstract_text
            .as_deref()
            .map(|text| self.extractor.extract(text))
            .unwrap_or_default();

        let pdf = self.scan_article_pdf(article).await;

        match self.policy {
            SourcePolicy::Merge => {
                let mut links = from_abstract;
                if let Some(scan) = pdf {
                    links.extend(scan.links);
                }
                links
            }
            SourcePolicy::PdfFirst => match pdf {
                Some(scan) if !scan.abandoned && !scan.links.is_empty() => scan.links,
                _ => from_abstract,
            },
        }
    }

    async fn scan_article_pdf(&self, article: &Article) -> Option<PdfScan> {
        let url = article.pdf_link.as_deref()?;
        let deadline = self.pdf_budget.map(|budget| Instant::now() + budget);

        match scan_pdf(
            self.pdf_source.as_ref(),
            url,
            Arc::clone(&self.extractor),
            deadline,
        )
        .await
        {
            Ok(scan) => {
                debug!(
                    article_id = article.id,
                    pages = scan.page_count,
                    links = scan.links.len(),
                    "PDF scanned"
                );
                Some(scan)
            }
            Err(e) => {
                warn!(article_id = article.id, url = %url, "PDF unavailable: {e}");
                None
            }
        }
    }

    /// Discover links for `article`, store them, and mark it processed.
    ///
    /// Each write commits on its own. If a write fails the article stays
    /// unprocessed and the already-stored links are reused on the next pass.
    ///
    /// # Errors
    ///
    /// Returns an error if a store write fails.
    pub async fn process(
        &self,
        conn: &mut SqliteConnection,
        article: &Article,
        links: &BTreeSet<String>,
    ) -> Result<ArticleOutcome> {
        let mut created = 0;

        for url in links {
            let repo = upsert_repository(conn, url).await?;
            link_article_to_repository(conn, article.id, repo.id).await?;

            if repo.created {
                created += 1;
                info!(article_id = article.id, repo_id = repo.id, url = %url, "Repository added");
            } else {
                debug!(article_id = article.id, repo_id = repo.id, url = %url, "Repository already present");
            }
        }

        mark_article_processed(conn, article.id, !links.is_empty()).await?;

        if links.is_empty() {
            info!(article_id = article.id, title = %article.title, "No repository links");
        } else {
            info!(
                article_id = article.id,
                repositories = links.len(),
                created,
                "Article processed"
            );
        }

        Ok(ArticleOutcome {
            article_id: article.id,
            repositories: links.len(),
            created,
        })
    }
}
