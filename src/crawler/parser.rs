//! HTML parsing for catalog listing pages and article landing pages.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// An article anchor found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub title: String,
    pub link: String,
}

/// Metadata read from an article's landing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleMetadata {
    pub doi: Option<String>,
    pub published_on: Option<String>,
    pub pdf_link: Option<String>,
    pub abstract_text: Option<String>,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector {css:?}: {e:?}"))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Extract article anchors from a collection listing page.
///
/// Relative links are resolved against `base`. Anchors without an href or
/// title are skipped.
///
/// # Errors
///
/// Returns an error only if the built-in selector fails to parse.
pub fn parse_listing(html: &str, base: &Url) -> Result<Vec<ListingEntry>> {
    let document = Html::parse_document(html);
    let anchors = selector("a.highwire-cite-linked-title")?;

    let entries = document
        .select(&anchors)
        .filter_map(|element| {
            let href = element.value().attr("href")?;
            let link = base.join(href).ok()?;
            let title = element_text(element);
            if title.is_empty() {
                return None;
            }
            Some(ListingEntry {
                title,
                link: link.to_string(),
            })
        })
        .collect();

    Ok(entries)
}

/// Read DOI, publication date, abstract and PDF link from an article page.
///
/// # Errors
///
/// Returns an error only if a built-in selector fails to parse.
pub fn parse_article_page(html: &str, base: &Url) -> Result<ArticleMetadata> {
    let document = Html::parse_document(html);

    let doi = meta_content(&document, "citation_doi")?;
    let published_on = meta_content(&document, "citation_publication_date")?
        .and_then(|raw| parse_publication_date(&raw));
    let abstract_text = meta_content(&document, "citation_abstract")?
        .map(|raw| strip_html(&raw))
        .filter(|text| !text.is_empty());

    let anchors = selector("a[href]")?;
    let pdf_link = document.select(&anchors).find_map(|element| {
        let href = element.value().attr("href")?;
        let is_pdf = element_text(element).contains("PDF") && href.ends_with(".pdf");
        if is_pdf {
            base.join(href).ok().map(|url| url.to_string())
        } else {
            None
        }
    });

    Ok(ArticleMetadata {
        doi,
        published_on,
        pdf_link,
        abstract_text,
    })
}

fn meta_content(document: &Html, name: &str) -> Result<Option<String>> {
    let meta = selector(&format!(r#"meta[name="{name}"]"#))?;
    Ok(document
        .select(&meta)
        .find_map(|element| element.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty()))
}

/// Normalize a citation date (`2024/03/01` or `2024-03-01`) to ISO 8601.
#[must_use]
pub fn parse_publication_date(raw: &str) -> Option<String> {
    let normalized = raw.trim().replace('/', "-");
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

/// Reduce an HTML fragment to its text content.
#[must_use]
pub fn strip_html(fragment: &str) -> String {
    let parsed = Html::parse_fragment(fragment);
    let text: String = parsed.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.biorxiv.org").unwrap()
    }

    #[test]
    fn test_parse_listing() {
        let html = r#"
            <html><body>
              <a class="highwire-cite-linked-title" href="/content/10.1101/2024.01.01.123456v1">
                <span>Deep learning for proteins</span>
              </a>
              <a class="other" href="/about">About</a>
              <a class="highwire-cite-linked-title" href="/content/10.1101/2024.01.02.654321v2">Second</a>
            </body></html>
        "#;

        let entries = parse_listing(html, &base()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Deep learning for proteins");
        assert_eq!(
            entries[0].link,
            "https://www.biorxiv.org/content/10.1101/2024.01.01.123456v1"
        );
        assert_eq!(entries[1].title, "Second");
    }

    #[test]
    fn test_parse_listing_skips_untitled_anchors() {
        let html = r#"<a class="highwire-cite-linked-title" href="/content/x">  </a>"#;
        assert!(parse_listing(html, &base()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_article_page() {
        let html = r#"
            <html><head>
              <meta name="citation_doi" content="10.1101/2024.01.01.123456">
              <meta name="citation_publication_date" content="2024/01/05">
              <meta name="citation_abstract" content="&lt;p&gt;Code at https://github.com/org/tool.&lt;/p&gt;">
            </head><body>
              <a href="/content/10.1101/2024.01.01.123456v1.full">Full Text</a>
              <a href="/content/10.1101/2024.01.01.123456v1.full.pdf">Download PDF</a>
            </body></html>
        "#;

        let meta = parse_article_page(html, &base()).unwrap();
        assert_eq!(meta.doi.as_deref(), Some("10.1101/2024.01.01.123456"));
        assert_eq!(meta.published_on.as_deref(), Some("2024-01-05"));
        assert_eq!(
            meta.pdf_link.as_deref(),
            Some("https://www.biorxiv.org/content/10.1101/2024.01.01.123456v1.full.pdf")
        );
        assert_eq!(
            meta.abstract_text.as_deref(),
            Some("Code at https://github.com/org/tool.")
        );
    }

    #[test]
    fn test_parse_article_page_missing_fields_are_none() {
        let meta = parse_article_page("<html><body><p>nothing</p></body></html>", &base()).unwrap();
        assert_eq!(meta, ArticleMetadata::default());
    }

    #[test]
    fn test_pdf_anchor_requires_label_and_extension() {
        let html = r#"
            <a href="/supplement.pdf">Supplementary material</a>
            <a href="/content/paper.full">PDF viewer</a>
        "#;
        let meta = parse_article_page(html, &base()).unwrap();
        assert_eq!(meta.pdf_link, None);
    }

    #[test]
    fn test_parse_publication_date() {
        assert_eq!(parse_publication_date("2023/12/31").as_deref(), Some("2023-12-31"));
        assert_eq!(parse_publication_date("2023-02-01").as_deref(), Some("2023-02-01"));
        assert_eq!(parse_publication_date("not a date"), None);
        assert_eq!(parse_publication_date("2023/13/01"), None);
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("<p>Hello <b>world</b></p>\n<p>again</p>"),
            "Hello world again"
        );
    }
}
