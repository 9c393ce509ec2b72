use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::constants::{
    DEFAULT_CATALOG_BASE_URL, DEFAULT_CATALOG_COLLECTION, DEFAULT_SWH_BASE_URL,
    DEFAULT_TRUSTED_HOSTS,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Which full-text sources feed the link extractor for one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePolicy {
    /// Scan the abstract and the PDF, union the results.
    Merge,
    /// Scan the PDF first; use the abstract only when the PDF yields nothing
    /// or its scan runs out of time.
    PdfFirst,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // Link extraction
    pub trusted_hosts: Vec<String>,
    pub source_policy: SourcePolicy,
    /// Per-article PDF scan budget. `None` scans every page.
    pub pdf_scan_budget: Option<Duration>,

    // Workers
    pub worker_concurrency: usize,

    // Software Heritage
    pub swh_base_url: String,
    pub swh_api_token: Option<String>,
    pub swh_requests_per_hour: u32,
    pub max_submit_retries: u32,
    pub retry_backoff: Duration,

    // HTTP
    pub http_timeout: Duration,

    // Catalog crawler
    pub catalog_base_url: String,
    pub catalog_collection: String,
    pub crawl_pages: u32,
    pub crawl_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to something unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let budget_secs = parse_env_u64("PDF_SCAN_BUDGET_SECS", 300)?;

        Ok(Self {
            database_path: PathBuf::from(env_or_default(
                "DATABASE_PATH",
                "./data/articles.sqlite",
            )),

            trusted_hosts: parse_host_list(optional_env("TRUSTED_HOSTS").as_deref()),
            source_policy: parse_source_policy(&env_or_default("PDF_SOURCE_POLICY", "merge"))?,
            pdf_scan_budget: (budget_secs > 0).then(|| Duration::from_secs(budget_secs)),

            worker_concurrency: parse_env_usize("WORKER_CONCURRENCY", 5)?,

            swh_base_url: env_or_default("SWH_BASE_URL", DEFAULT_SWH_BASE_URL),
            swh_api_token: optional_env("SWH_API_TOKEN"),
            swh_requests_per_hour: parse_env_u32("SWH_REQUESTS_PER_HOUR", 1200)?,
            max_submit_retries: parse_env_u32("MAX_SUBMIT_RETRIES", 3)?,
            retry_backoff: Duration::from_secs(parse_env_u64("RETRY_BACKOFF_SECS", 5)?),

            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),

            catalog_base_url: env_or_default("CATALOG_BASE_URL", DEFAULT_CATALOG_BASE_URL),
            catalog_collection: env_or_default("CATALOG_COLLECTION", DEFAULT_CATALOG_COLLECTION),
            crawl_pages: parse_env_u32("CRAWL_PAGES", 10)?,
            crawl_delay: Duration::from_millis(parse_env_u64("CRAWL_DELAY_MS", 1000)?),
        })
    }

    /// Defaults suitable for tests: no delays, no budget, local paths.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            database_path: PathBuf::from("./test.sqlite"),
            trusted_hosts: parse_host_list(None),
            source_policy: SourcePolicy::Merge,
            pdf_scan_budget: None,
            worker_concurrency: 5,
            swh_base_url: "http://127.0.0.1:9".to_string(),
            swh_api_token: Some("test-token".to_string()),
            swh_requests_per_hour: 3_600_000,
            max_submit_retries: 3,
            retry_backoff: Duration::from_millis(10),
            http_timeout: Duration::from_secs(10),
            catalog_base_url: "http://127.0.0.1:9".to_string(),
            catalog_collection: DEFAULT_CATALOG_COLLECTION.to_string(),
            crawl_pages: 1,
            crawl_delay: Duration::ZERO,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(invalid("WORKER_CONCURRENCY", "must be at least 1"));
        }
        if self.swh_requests_per_hour == 0 {
            return Err(invalid("SWH_REQUESTS_PER_HOUR", "must be at least 1"));
        }
        if self.trusted_hosts.is_empty() {
            return Err(invalid("TRUSTED_HOSTS", "cannot be empty"));
        }
        for (name, value) in [
            ("SWH_BASE_URL", &self.swh_base_url),
            ("CATALOG_BASE_URL", &self.catalog_base_url),
        ] {
            if let Err(e) = Url::parse(value) {
                return Err(invalid(name, &format!("'{value}' is not a URL: {e}")));
            }
        }
        Ok(())
    }

    /// Minimum spacing between two submissions from one worker.
    #[must_use]
    pub fn submission_interval(&self) -> Duration {
        Duration::from_secs(3600) / self.swh_requests_per_hour.max(1)
    }
}

fn invalid(name: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        message: message.to_string(),
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

/// Parse a comma-separated host list, falling back to the default providers.
fn parse_host_list(value: Option<&str>) -> Vec<String> {
    match value {
        Some(list) => list
            .split(',')
            .map(|h| h.trim().trim_start_matches("www.").to_lowercase())
            .filter(|h| !h.is_empty())
            .collect(),
        None => DEFAULT_TRUSTED_HOSTS.iter().map(|h| (*h).to_string()).collect(),
    }
}

fn parse_source_policy(value: &str) -> Result<SourcePolicy, ConfigError> {
    match value.to_lowercase().as_str() {
        "merge" => Ok(SourcePolicy::Merge),
        "pdf-first" | "pdf_first" => Ok(SourcePolicy::PdfFirst),
        _ => Err(ConfigError::InvalidValue {
            name: "PDF_SOURCE_POLICY".to_string(),
            message: format!("must be 'merge' or 'pdf-first', got '{value}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_source_policy() {
        assert_eq!(parse_source_policy("merge").unwrap(), SourcePolicy::Merge);
        assert_eq!(parse_source_policy("MERGE").unwrap(), SourcePolicy::Merge);
        assert_eq!(parse_source_policy("pdf-first").unwrap(), SourcePolicy::PdfFirst);
        assert_eq!(parse_source_policy("pdf_first").unwrap(), SourcePolicy::PdfFirst);
        assert!(parse_source_policy("abstract-only").is_err());
    }

    #[test]
    fn test_parse_host_list() {
        assert_eq!(parse_host_list(None), vec!["github.com", "gitlab.com"]);
        assert_eq!(
            parse_host_list(Some("GitHub.com, www.codeberg.org,,")),
            vec!["github.com", "codeberg.org"]
        );
    }

    #[test]
    fn test_submission_interval() {
        let config = Config {
            swh_requests_per_hour: 1200,
            ..Config::for_testing()
        };
        assert_eq!(config.submission_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = Config {
            worker_concurrency: 0,
            ..Config::for_testing()
        };
        assert!(config.validate().is_err());
        assert!(Config::for_testing().validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        for name in [
            "WORKER_CONCURRENCY",
            "SWH_REQUESTS_PER_HOUR",
            "PDF_SCAN_BUDGET_SECS",
            "PDF_SOURCE_POLICY",
            "TRUSTED_HOSTS",
        ] {
            std::env::remove_var(name);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.worker_concurrency, 5);
        assert_eq!(config.max_submit_retries, 3);
        assert_eq!(config.submission_interval(), Duration::from_secs(3));
        assert_eq!(config.pdf_scan_budget, Some(Duration::from_secs(300)));
        assert_eq!(config.source_policy, SourcePolicy::Merge);
        assert_eq!(config.trusted_hosts, vec!["github.com", "gitlab.com"]);
    }

    #[test]
    #[serial]
    fn test_from_env_zero_budget_disables_scan_limit() {
        std::env::set_var("PDF_SCAN_BUDGET_SECS", "0");
        let config = Config::from_env().unwrap();
        std::env::remove_var("PDF_SCAN_BUDGET_SECS");
        assert_eq!(config.pdf_scan_budget, None);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage_number() {
        std::env::set_var("WORKER_CONCURRENCY", "five");
        let result = Config::from_env();
        std::env::remove_var("WORKER_CONCURRENCY");
        assert!(matches!(result, Err(ConfigError::ParseInt { .. })));
    }
}
