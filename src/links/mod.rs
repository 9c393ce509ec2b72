//! Repository link discovery in abstracts and PDF text.

mod extractor;
mod normalize;

pub use extractor::LinkExtractor;
pub use normalize::{clean_archive_url, is_trusted_host, normalize_repository_url};
