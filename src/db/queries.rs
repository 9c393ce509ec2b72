use anyhow::{Context, Result};
use sqlx::SqliteConnection;

use super::models::{
    ArchivalStatus, Article, CodeRepository, NewArticle, ProcessingState, StoreSummary,
};

// ========== Articles ==========

/// Insert an article unless one with the same DOI already exists.
///
/// Returns the new row id, or `None` when the DOI was already present.
/// Articles without a DOI are always inserted.
pub async fn insert_article(conn: &mut SqliteConnection, article: &NewArticle) -> Result<Option<i64>> {
    let result = sqlx::query(
        r"
        INSERT OR IGNORE INTO articles (title, link, doi, published_on, pdf_link, abstract_text)
        VALUES (?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&article.title)
    .bind(&article.link)
    .bind(&article.doi)
    .bind(&article.published_on)
    .bind(&article.pdf_link)
    .bind(&article.abstract_text)
    .execute(&mut *conn)
    .await
    .context("Failed to insert article")?;

    if result.rows_affected() == 0 {
        Ok(None)
    } else {
        Ok(Some(result.last_insert_rowid()))
    }
}

/// Check whether an article with this DOI is already stored.
pub async fn article_exists_by_doi(conn: &mut SqliteConnection, doi: &str) -> Result<bool> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE doi = ?")
        .bind(doi)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to look up article by DOI")?;

    Ok(row.0 > 0)
}

/// Get an article by ID.
pub async fn get_article(conn: &mut SqliteConnection, id: i64) -> Result<Option<Article>> {
    sqlx::query_as("SELECT * FROM articles WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch article")
}

/// All articles whose links have not been extracted yet.
pub async fn select_unprocessed_articles(conn: &mut SqliteConnection) -> Result<Vec<Article>> {
    sqlx::query_as("SELECT * FROM articles WHERE processing_state = ? ORDER BY id")
        .bind(ProcessingState::Unprocessed.as_str())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch unprocessed articles")
}

/// Mark an article as processed.
///
/// Only moves articles that are still unprocessed; returns whether the row
/// changed.
pub async fn mark_article_processed(
    conn: &mut SqliteConnection,
    article_id: i64,
    found_links: bool,
) -> Result<bool> {
    let state = if found_links {
        ProcessingState::ProcessedWithLinks
    } else {
        ProcessingState::ProcessedNoLinks
    };

    let result = sqlx::query(
        "UPDATE articles SET processing_state = ? WHERE id = ? AND processing_state = ?",
    )
    .bind(state.as_str())
    .bind(article_id)
    .bind(ProcessingState::Unprocessed.as_str())
    .execute(&mut *conn)
    .await
    .context("Failed to mark article processed")?;

    Ok(result.rows_affected() > 0)
}

// ========== Repositories ==========

/// Result of [`upsert_repository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertedRepository {
    pub id: i64,
    /// False when the URL was already stored.
    pub created: bool,
}

/// Insert a repository by normalized URL if absent, returning its ID.
///
/// The UNIQUE constraint on `url` arbitrates concurrent inserts of the same
/// URL; the loser's insert is ignored and it reads the winner's row.
pub async fn upsert_repository(conn: &mut SqliteConnection, url: &str) -> Result<UpsertedRepository> {
    let result = sqlx::query("INSERT OR IGNORE INTO code_repositories (url) VALUES (?)")
        .bind(url)
        .execute(&mut *conn)
        .await
        .context("Failed to insert repository")?;

    let created = result.rows_affected() > 0;

    let (id,): (i64,) = sqlx::query_as("SELECT id FROM code_repositories WHERE url = ?")
        .bind(url)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to read repository id")?;

    Ok(UpsertedRepository { id, created })
}

/// Get a repository by ID.
pub async fn get_repository(conn: &mut SqliteConnection, id: i64) -> Result<Option<CodeRepository>> {
    sqlx::query_as("SELECT * FROM code_repositories WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch repository")
}

/// Get a repository by its normalized URL.
pub async fn get_repository_by_url(
    conn: &mut SqliteConnection,
    url: &str,
) -> Result<Option<CodeRepository>> {
    sqlx::query_as("SELECT * FROM code_repositories WHERE url = ?")
        .bind(url)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch repository by URL")
}

/// Repositories that have never been submitted to the archive.
pub async fn select_unarchived_repositories(conn: &mut SqliteConnection) -> Result<Vec<CodeRepository>> {
    sqlx::query_as("SELECT * FROM code_repositories WHERE archival_status = ? ORDER BY id")
        .bind(ArchivalStatus::NotSubmitted.as_str())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch unarchived repositories")
}

/// Repositories whose archival was requested but not yet observed.
pub async fn select_pending_repositories(conn: &mut SqliteConnection) -> Result<Vec<CodeRepository>> {
    sqlx::query_as("SELECT * FROM code_repositories WHERE archival_status = ? ORDER BY id")
        .bind(ArchivalStatus::SubmissionPending.as_str())
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch pending repositories")
}

/// Record that the archive holds this repository.
pub async fn record_archived(
    conn: &mut SqliteConnection,
    repo_id: i64,
    archive_link: Option<&str>,
    archive_date: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        r"
        UPDATE code_repositories
        SET archival_status = ?, archive_link = ?, archive_last_visit = ?
        WHERE id = ?
        ",
    )
    .bind(ArchivalStatus::Archived.as_str())
    .bind(archive_link)
    .bind(archive_date)
    .bind(repo_id)
    .execute(&mut *conn)
    .await
    .context("Failed to record archived repository")?;

    Ok(result.rows_affected() > 0)
}

/// Record that an archival request was accepted.
///
/// Never downgrades a repository that is already archived.
pub async fn record_submission_pending(conn: &mut SqliteConnection, repo_id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE code_repositories SET archival_status = ? WHERE id = ? AND archival_status = ?",
    )
    .bind(ArchivalStatus::SubmissionPending.as_str())
    .bind(repo_id)
    .bind(ArchivalStatus::NotSubmitted.as_str())
    .execute(&mut *conn)
    .await
    .context("Failed to record pending submission")?;

    Ok(result.rows_affected() > 0)
}

// ========== Article <-> repository links ==========

/// Link an article to a repository. Re-linking an existing pair is a no-op.
pub async fn link_article_to_repository(
    conn: &mut SqliteConnection,
    article_id: i64,
    repo_id: i64,
) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO article_repositories (article_id, repo_id) VALUES (?, ?)")
        .bind(article_id)
        .bind(repo_id)
        .execute(&mut *conn)
        .await
        .context("Failed to link article to repository")?;

    Ok(())
}

/// Repositories cited by an article.
pub async fn repositories_for_article(
    conn: &mut SqliteConnection,
    article_id: i64,
) -> Result<Vec<CodeRepository>> {
    sqlx::query_as(
        r"
        SELECT r.* FROM code_repositories r
        JOIN article_repositories ar ON ar.repo_id = r.id
        WHERE ar.article_id = ?
        ORDER BY r.url
        ",
    )
    .bind(article_id)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to fetch repositories for article")
}

/// Number of join rows for an article/repository pair, or for all pairs when
/// both ids are `None`.
pub async fn count_article_links(
    conn: &mut SqliteConnection,
    article_id: Option<i64>,
    repo_id: Option<i64>,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r"
        SELECT COUNT(*) FROM article_repositories
        WHERE (?1 IS NULL OR article_id = ?1) AND (?2 IS NULL OR repo_id = ?2)
        ",
    )
    .bind(article_id)
    .bind(repo_id)
    .fetch_one(&mut *conn)
    .await
    .context("Failed to count article links")?;

    Ok(row.0)
}

// ========== Summary ==========

/// Row counts per lifecycle state.
pub async fn store_summary(conn: &mut SqliteConnection) -> Result<StoreSummary> {
    let mut summary = StoreSummary::default();

    let article_rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT processing_state, COUNT(*) FROM articles GROUP BY processing_state",
    )
    .fetch_all(&mut *conn)
    .await
    .context("Failed to count articles")?;

    for (state, count) in article_rows {
        match ProcessingState::from_str(&state) {
            Some(ProcessingState::Unprocessed) => summary.articles_unprocessed = count,
            Some(ProcessingState::ProcessedWithLinks) => summary.articles_with_links = count,
            Some(ProcessingState::ProcessedNoLinks) => summary.articles_without_links = count,
            None => {}
        }
    }

    let repo_rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT archival_status, COUNT(*) FROM code_repositories GROUP BY archival_status",
    )
    .fetch_all(&mut *conn)
    .await
    .context("Failed to count repositories")?;

    for (status, count) in repo_rows {
        match ArchivalStatus::from_str(&status) {
            Some(ArchivalStatus::NotSubmitted) => summary.repositories_not_submitted = count,
            Some(ArchivalStatus::SubmissionPending) => summary.repositories_pending = count,
            Some(ArchivalStatus::Archived) => summary.repositories_archived = count,
            None => {}
        }
    }

    summary.article_links = count_article_links(conn, None, None).await?;

    Ok(summary)
}
