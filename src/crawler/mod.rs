//! Catalog crawler: turns collection listing pages into stored articles.

mod parser;

pub use parser::{
    parse_article_page, parse_listing, parse_publication_date, strip_html, ArticleMetadata,
    ListingEntry,
};

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::db::{article_exists_by_doi, insert_article, Database, NewArticle};

/// How far a crawl goes once it meets articles it already has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Stop at the first known DOI. The listing is newest-first, so
    /// everything after it has been seen before.
    Incremental,
    /// Walk every requested page, skipping known articles.
    Full,
}

/// Tally of one crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages: u32,
    pub inserted: usize,
    pub known: usize,
    pub failed: usize,
    pub caught_up: bool,
}

/// Fetches a preprint collection and stores its articles.
pub struct CatalogCrawler {
    client: Client,
    base_url: Url,
    collection: String,
    delay: Duration,
}

impl CatalogCrawler {
    /// # Errors
    ///
    /// Returns an error if the base URL is not a valid absolute URL.
    pub fn new(client: Client, base_url: &str, collection: &str, delay: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid catalog base URL: {base_url}"))?;
        Ok(Self {
            client,
            base_url,
            collection: collection.to_string(),
            delay,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the configured base URL is invalid.
    pub fn from_config(client: Client, config: &Config) -> Result<Self> {
        Self::new(
            client,
            &config.catalog_base_url,
            &config.catalog_collection,
            config.crawl_delay,
        )
    }

    fn listing_url(&self, page: u32) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("collection/{}", self.collection))
            .context("Failed to build listing URL")?;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        Ok(url)
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;

        if !response.status().is_success() {
            bail!("Fetch of {url} failed with status {}", response.status());
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {url}"))
    }

    /// Crawl listing pages `1..=pages` and insert the articles found.
    ///
    /// # Errors
    ///
    /// Returns an error only on store failures. Fetch and parse failures are
    /// logged and the page or article is skipped.
    pub async fn crawl(
        &self,
        db: &Database,
        pages: u32,
        mode: CrawlMode,
        cancel: &CancellationToken,
    ) -> Result<CrawlSummary> {
        let mut summary = CrawlSummary::default();

        'pages: for page in 1..=pages {
            if cancel.is_cancelled() {
                info!("Crawl cancelled");
                break;
            }

            let listing_url = self.listing_url(page)?;
            info!(page, pages, url = %listing_url, "Crawling listing page");
            summary.pages += 1;

            let entries = match self.fetch(listing_url.as_str()).await {
                Ok(html) => parse_listing(&html, &self.base_url)?,
                Err(e) => {
                    warn!(page, "Skipping listing page: {e:#}");
                    continue;
                }
            };

            if entries.is_empty() {
                debug!(page, "Listing page has no articles");
            }

            for entry in entries {
                if cancel.is_cancelled() {
                    info!("Crawl cancelled");
                    break 'pages;
                }

                tokio::time::sleep(self.delay).await;

                let metadata = match self.fetch(&entry.link).await {
                    Ok(html) => parse_article_page(&html, &self.base_url)?,
                    Err(e) => {
                        warn!(link = %entry.link, "Skipping article: {e:#}");
                        summary.failed += 1;
                        continue;
                    }
                };

                let mut conn = db.acquire().await?;

                if let Some(doi) = &metadata.doi {
                    if article_exists_by_doi(&mut conn, doi).await? {
                        summary.known += 1;
                        if mode == CrawlMode::Incremental {
                            info!(doi = %doi, "Reached a known article, stopping crawl");
                            summary.caught_up = true;
                            break 'pages;
                        }
                        debug!(doi = %doi, "Article already stored");
                        continue;
                    }
                }

                let article = NewArticle {
                    title: entry.title,
                    link: entry.link,
                    doi: metadata.doi,
                    published_on: metadata.published_on,
                    pdf_link: metadata.pdf_link,
                    abstract_text: metadata.abstract_text,
                };

                match insert_article(&mut conn, &article).await? {
                    Some(id) => {
                        summary.inserted += 1;
                        debug!(id, title = %article.title, "Article stored");
                    }
                    None => summary.known += 1,
                }
            }
        }

        info!(
            pages = summary.pages,
            inserted = summary.inserted,
            known = summary.known,
            failed = summary.failed,
            caught_up = summary.caught_up,
            "Crawl complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_url() {
        let crawler = CatalogCrawler::new(
            Client::new(),
            "https://www.biorxiv.org",
            "bioinformatics",
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(
            crawler.listing_url(3).unwrap().as_str(),
            "https://www.biorxiv.org/collection/bioinformatics?page=3"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(CatalogCrawler::new(Client::new(), "not a url", "x", Duration::ZERO).is_err());
    }
}
