use serde::{Deserialize, Serialize};

/// A preprint harvested from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub link: String,
    pub doi: Option<String>,
    /// ISO 8601 publication date.
    pub published_on: Option<String>,
    pub pdf_link: Option<String>,
    pub abstract_text: Option<String>,
    pub processing_state: String,
    pub created_at: String,
}

impl Article {
    #[must_use]
    pub fn state(&self) -> Option<ProcessingState> {
        ProcessingState::from_str(&self.processing_state)
    }
}

/// Where an article is in the link-extraction lifecycle.
///
/// Moves forward only: `Unprocessed` to one of the two processed states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Unprocessed,
    ProcessedWithLinks,
    ProcessedNoLinks,
}

impl ProcessingState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::ProcessedWithLinks => "processed_with_links",
            Self::ProcessedNoLinks => "processed_no_links",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unprocessed" => Some(Self::Unprocessed),
            "processed_with_links" => Some(Self::ProcessedWithLinks),
            "processed_no_links" => Some(Self::ProcessedNoLinks),
            _ => None,
        }
    }
}

/// A code repository cited by at least one article.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CodeRepository {
    pub id: i64,
    /// Normalized URL, unique across the table.
    pub url: String,
    pub archival_status: String,
    pub archive_link: Option<String>,
    pub archive_last_visit: Option<String>,
    pub first_seen_at: String,
}

impl CodeRepository {
    #[must_use]
    pub fn status(&self) -> Option<ArchivalStatus> {
        ArchivalStatus::from_str(&self.archival_status)
    }
}

/// Archival status of a repository with respect to Software Heritage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchivalStatus {
    NotSubmitted,
    SubmissionPending,
    Archived,
}

impl ArchivalStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSubmitted => "not_submitted",
            Self::SubmissionPending => "submission_pending",
            Self::Archived => "archived",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_submitted" => Some(Self::NotSubmitted),
            "submission_pending" => Some(Self::SubmissionPending),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Data for inserting a new article.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub title: String,
    pub link: String,
    pub doi: Option<String>,
    pub published_on: Option<String>,
    pub pdf_link: Option<String>,
    pub abstract_text: Option<String>,
}

/// Row counts per lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub articles_unprocessed: i64,
    pub articles_with_links: i64,
    pub articles_without_links: i64,
    pub repositories_not_submitted: i64,
    pub repositories_pending: i64,
    pub repositories_archived: i64,
    pub article_links: i64,
}
