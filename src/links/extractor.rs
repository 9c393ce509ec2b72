use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::normalize::normalize_repository_url;

/// A maximal run of non-whitespace starting with an http(s) scheme.
static URL_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)https?://\S+").expect("Invalid URL regex"));

/// Characters prose tends to leave glued to the end of a URL, including the
/// typographic quotes and brackets common in text extracted from PDFs.
const TRAILING_PUNCTUATION: &[char] = &[
    ')', ']', '}', '.', ',', ';', ':', '!', '?', '"', '\'', '>', '*',
    '\u{201D}', // ”
    '\u{2019}', // ’
    '\u{201C}', // “
    '\u{2018}', // ‘
    '\u{00BB}', // »
    '\u{203A}', // ›
    '\u{2026}', // …
    '\u{FF09}', // fullwidth )
    '\u{FF3D}', // fullwidth ]
    '\u{3009}', // 〉
    '\u{300D}', // 」
    '\u{300F}', // 』
    '\u{3011}', // 】
];

/// Extracts trusted code repository URLs from free text.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    trusted_hosts: Vec<String>,
}

impl LinkExtractor {
    #[must_use]
    pub fn new(trusted_hosts: Vec<String>) -> Self {
        Self { trusted_hosts }
    }

    #[must_use]
    pub fn trusted_hosts(&self) -> &[String] {
        &self.trusted_hosts
    }

    /// Extract the distinct normalized repository URLs embedded in `text`.
    #[must_use]
    pub fn extract(&self, text: &str) -> BTreeSet<String> {
        URL_TOKEN
            .find_iter(text)
            .filter_map(|m| {
                let candidate = strip_trailing_punctuation(m.as_str());
                normalize_repository_url(candidate, &self.trusted_hosts)
            })
            .collect()
    }
}

fn strip_trailing_punctuation(token: &str) -> &str {
    token.trim_end_matches(TRAILING_PUNCTUATION)
}
