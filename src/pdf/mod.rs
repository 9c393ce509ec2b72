//! PDF full-text source.
//!
//! Downloads a PDF and exposes the plain text of each page. Page scanning
//! for repository links is bounded by an optional wall-clock deadline that is
//! checked before every page; a page that has started extracting always
//! finishes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

use crate::links::LinkExtractor;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("failed to download PDF: {0}")]
    Download(#[from] reqwest::Error),
    #[error("PDF download returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("failed to parse PDF: {0}")]
    Parse(String),
}

/// Plain text of each page of one document.
pub trait PageTexts: Send {
    fn page_count(&self) -> usize;

    /// Text of the page at `index` (0-based), or `None` if the page has no
    /// extractable text.
    fn page_text(&mut self, index: usize) -> Option<String>;
}

/// Something that can turn a PDF URL into per-page text.
#[async_trait]
pub trait PdfTextSource: Send + Sync {
    /// Fetch and open the document at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be downloaded or parsed.
    async fn open(&self, url: &str) -> Result<Box<dyn PageTexts>, PdfError>;
}

/// Downloads PDFs over HTTP and extracts text with `lopdf`.
#[derive(Clone)]
pub struct HttpPdfSource {
    client: Client,
}

impl HttpPdfSource {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PdfTextSource for HttpPdfSource {
    async fn open(&self, url: &str) -> Result<Box<dyn PageTexts>, PdfError> {
        debug!(url = %url, "Downloading PDF");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PdfError::Status(status));
        }

        let bytes = response.bytes().await?;

        let pages = tokio::task::spawn_blocking(move || LopdfPages::load(&bytes))
            .await
            .map_err(|e| PdfError::Parse(format!("parser task failed: {e}")))??;

        Ok(Box::new(pages))
    }
}

struct LopdfPages {
    document: lopdf::Document,
    page_numbers: Vec<u32>,
}

impl LopdfPages {
    fn load(bytes: &[u8]) -> Result<Self, PdfError> {
        let document =
            lopdf::Document::load_mem(bytes).map_err(|e| PdfError::Parse(e.to_string()))?;
        let page_numbers = document.get_pages().keys().copied().collect();

        Ok(Self {
            document,
            page_numbers,
        })
    }
}

impl PageTexts for LopdfPages {
    fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    fn page_text(&mut self, index: usize) -> Option<String> {
        let page_number = *self.page_numbers.get(index)?;
        match self.document.extract_text(&[page_number]) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                debug!(page = page_number, "Page text not extractable: {e}");
                None
            }
        }
    }
}

/// Links found in one document.
#[derive(Debug, Clone, Default)]
pub struct PdfScan {
    pub links: BTreeSet<String>,
    pub page_count: usize,
    pub pages_scanned: usize,
    /// True when the deadline passed before the last page.
    pub abandoned: bool,
}

/// Run the extractor over every page with text, stopping at `deadline`.
pub fn scan_pages(
    pages: &mut dyn PageTexts,
    extractor: &LinkExtractor,
    deadline: Option<Instant>,
) -> PdfScan {
    let page_count = pages.page_count();
    let mut scan = PdfScan {
        page_count,
        ..PdfScan::default()
    };

    for index in 0..page_count {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            scan.abandoned = true;
            break;
        }

        if let Some(text) = pages.page_text(index) {
            scan.links.extend(extractor.extract(&text));
        }
        scan.pages_scanned += 1;
    }

    scan
}

/// Download the PDF at `url` and scan it for repository links.
///
/// # Errors
///
/// Returns an error if the PDF cannot be downloaded or parsed.
pub async fn scan_pdf(
    source: &dyn PdfTextSource,
    url: &str,
    extractor: Arc<LinkExtractor>,
    deadline: Option<Instant>,
) -> Result<PdfScan, PdfError> {
    let mut pages = source.open(url).await?;

    let scan = tokio::task::spawn_blocking(move || {
        scan_pages(pages.as_mut(), &extractor, deadline)
    })
    .await
    .map_err(|e| PdfError::Parse(format!("page scan task failed: {e}")))?;

    if scan.abandoned {
        warn!(
            url = %url,
            scanned = scan.pages_scanned,
            pages = scan.page_count,
            "PDF scan budget exhausted, remaining pages skipped"
        );
    }

    Ok(scan)
}
