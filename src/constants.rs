//! Shared constants used across the application.

/// User agent sent with catalog, PDF and archive requests.
pub const USER_AGENT: &str = concat!(
    "preprint-repo-archiver/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/preprint-repo-archiver)"
);

/// Code hosting providers trusted when no allow-list is configured.
pub const DEFAULT_TRUSTED_HOSTS: &[&str] = &["github.com", "gitlab.com"];

/// Software Heritage web root. The REST API lives under `/api/1`.
pub const DEFAULT_SWH_BASE_URL: &str = "https://archive.softwareheritage.org";

/// Preprint server hosting the bioinformatics collection.
pub const DEFAULT_CATALOG_BASE_URL: &str = "https://www.biorxiv.org";

/// Collection crawled by default.
pub const DEFAULT_CATALOG_COLLECTION: &str = "bioinformatics";
