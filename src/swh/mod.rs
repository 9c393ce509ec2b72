//! Software Heritage archive client.
//!
//! Two endpoints matter here: the origin lookup (is this repository already
//! archived, and when was it last visited?) and the save request (please
//! archive this repository).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::links::clean_archive_url;

/// Result of looking a repository up in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The archive knows this origin.
    Found {
        /// Date of the most recent visit, if the visit history was readable.
        last_visit: Option<String>,
        /// Browse page for the origin, when visits exist.
        browse_url: Option<String>,
    },
    /// The archive has no record of this origin.
    NotFound,
    /// The lookup failed (network error, unexpected status, bad body).
    Indeterminate(String),
}

/// Result of one save request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// HTTP 429.
    RateLimited,
    /// HTTP 401/403: missing or bad token.
    Unauthorized,
    /// HTTP 400/404 or an explicit rejection: the URL cannot be archived.
    InvalidTarget,
    /// Network failure or 5xx.
    Transient(String),
    /// Any other status.
    Failed(u16),
}

impl SubmitOutcome {
    /// Whether the same request may succeed if sent again later in this run.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient(_))
    }
}

/// The archive operations the reconciler depends on.
#[async_trait]
pub trait ArchiveService: Send + Sync {
    async fn check(&self, url: &str) -> CheckOutcome;
    async fn submit(&self, url: &str) -> SubmitOutcome;
}

#[derive(Debug, Deserialize)]
struct OriginInfo {
    origin_visits_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OriginVisit {
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SaveRequest {
    save_request_status: Option<String>,
}

/// HTTP client for the Software Heritage REST API.
#[derive(Clone)]
pub struct SoftwareHeritageClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl SoftwareHeritageClient {
    /// Create a client rooted at `base_url` (the web root, not `/api/1`).
    #[must_use]
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    #[must_use]
    pub fn from_config(client: Client, config: &Config) -> Self {
        Self::new(client, &config.swh_base_url, config.swh_api_token.clone())
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/1/{path}", self.base_url)
    }

    fn browse_url(&self, encoded_origin: &str) -> String {
        format!("{}/browse/origin/{encoded_origin}/", self.base_url)
    }

    async fn latest_visit(&self, visits_url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(visits_url)
            .send()
            .await
            .context("Failed to fetch origin visits")?
            .error_for_status()
            .context("Origin visits request failed")?;

        let visits: Vec<OriginVisit> = response
            .json()
            .await
            .context("Failed to parse origin visits")?;

        Ok(visits.into_iter().next().and_then(|v| v.date))
    }
}

#[async_trait]
impl ArchiveService for SoftwareHeritageClient {
    async fn check(&self, url: &str) -> CheckOutcome {
        let encoded = urlencoding::encode(clean_archive_url(url)).into_owned();
        let check_url = self.api_url(&format!("origin/{encoded}/get/"));

        debug!(url = %url, "Checking Software Heritage origin");

        let response = match self.client.get(&check_url).send().await {
            Ok(r) => r,
            Err(e) => return CheckOutcome::Indeterminate(format!("request failed: {e}")),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return CheckOutcome::NotFound;
        }
        if !status.is_success() {
            return CheckOutcome::Indeterminate(format!("HTTP {status}"));
        }

        let info: OriginInfo = match response.json().await {
            Ok(info) => info,
            Err(e) => return CheckOutcome::Indeterminate(format!("bad origin body: {e}")),
        };

        let Some(visits_url) = info.origin_visits_url else {
            return CheckOutcome::Found {
                last_visit: None,
                browse_url: None,
            };
        };

        match self.latest_visit(&visits_url).await {
            Ok(Some(date)) => CheckOutcome::Found {
                last_visit: Some(date),
                browse_url: Some(self.browse_url(&encoded)),
            },
            Ok(None) => CheckOutcome::Found {
                last_visit: None,
                browse_url: None,
            },
            Err(e) => {
                // The origin exists; only its metadata is missing.
                warn!(url = %url, "Could not read visit history: {e:#}");
                CheckOutcome::Found {
                    last_visit: None,
                    browse_url: None,
                }
            }
        }
    }

    async fn submit(&self, url: &str) -> SubmitOutcome {
        let encoded = urlencoding::encode(clean_archive_url(url)).into_owned();
        let save_url = self.api_url(&format!("origin/save/git/url/{encoded}/"));

        debug!(url = %url, "Submitting save request");

        let mut request = self.client.post(&save_url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return SubmitOutcome::Transient(format!("request failed: {e}")),
        };

        let status = response.status();
        let outcome = classify_submit_status(status);
        if outcome != SubmitOutcome::Accepted {
            return outcome;
        }

        // A 200 can still carry an explicit rejection.
        match response.json::<SaveRequest>().await {
            Ok(SaveRequest {
                save_request_status: Some(s),
            }) if s == "rejected" => SubmitOutcome::InvalidTarget,
            _ => SubmitOutcome::Accepted,
        }
    }
}

fn classify_submit_status(status: StatusCode) -> SubmitOutcome {
    match status.as_u16() {
        200..=299 => SubmitOutcome::Accepted,
        429 => SubmitOutcome::RateLimited,
        401 | 403 => SubmitOutcome::Unauthorized,
        400 | 404 => SubmitOutcome::InvalidTarget,
        500..=599 => SubmitOutcome::Transient(format!("HTTP {status}")),
        code => SubmitOutcome::Failed(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_submit_status() {
        assert_eq!(classify_submit_status(StatusCode::OK), SubmitOutcome::Accepted);
        assert_eq!(
            classify_submit_status(StatusCode::TOO_MANY_REQUESTS),
            SubmitOutcome::RateLimited
        );
        assert_eq!(classify_submit_status(StatusCode::FORBIDDEN), SubmitOutcome::Unauthorized);
        assert_eq!(classify_submit_status(StatusCode::NOT_FOUND), SubmitOutcome::InvalidTarget);
        assert!(classify_submit_status(StatusCode::BAD_GATEWAY).is_retryable());
        assert_eq!(classify_submit_status(StatusCode::CONFLICT), SubmitOutcome::Failed(409));
    }

    #[test]
    fn test_retryable() {
        assert!(SubmitOutcome::RateLimited.is_retryable());
        assert!(SubmitOutcome::Transient("timeout".into()).is_retryable());
        assert!(!SubmitOutcome::Unauthorized.is_retryable());
        assert!(!SubmitOutcome::InvalidTarget.is_retryable());
        assert!(!SubmitOutcome::Failed(418).is_retryable());
    }

    #[test]
    fn test_urls() {
        let client = SoftwareHeritageClient::new(
            Client::new(),
            "https://archive.softwareheritage.org/",
            None,
        );
        let encoded = urlencoding::encode("https://github.com/acme/tool").into_owned();
        assert_eq!(encoded, "https%3A%2F%2Fgithub.com%2Facme%2Ftool");
        assert_eq!(
            client.api_url(&format!("origin/{encoded}/get/")),
            "https://archive.softwareheritage.org/api/1/origin/https%3A%2F%2Fgithub.com%2Facme%2Ftool/get/"
        );
        assert_eq!(
            client.browse_url(&encoded),
            "https://archive.softwareheritage.org/browse/origin/https%3A%2F%2Fgithub.com%2Facme%2Ftool/"
        );
    }
}
