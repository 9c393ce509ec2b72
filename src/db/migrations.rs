use anyhow::{Context, Result};
use sqlx::SqliteConnection;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(conn: &mut SqliteConnection) -> Result<()> {
    create_migration_table(conn).await?;
    let current_version = get_schema_version(conn).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(conn).await?;
        set_schema_version(conn, 1).await?;
    }

    Ok(())
}

async fn create_migration_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn run_migration_v1(conn: &mut SqliteConnection) -> Result<()> {
    debug!("Running migration v1: creating initial schema and indexes");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            link TEXT NOT NULL,
            doi TEXT UNIQUE,
            published_on TEXT,
            pdf_link TEXT,
            abstract_text TEXT,
            processing_state TEXT NOT NULL DEFAULT 'unprocessed'
                CHECK (processing_state IN ('unprocessed', 'processed_with_links', 'processed_no_links')),
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create articles table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS code_repositories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL UNIQUE,
            archival_status TEXT NOT NULL DEFAULT 'not_submitted'
                CHECK (archival_status IN ('not_submitted', 'submission_pending', 'archived')),
            archive_link TEXT,
            archive_last_visit TEXT,
            first_seen_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create code_repositories table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS article_repositories (
            article_id INTEGER NOT NULL REFERENCES articles(id),
            repo_id INTEGER NOT NULL REFERENCES code_repositories(id),
            PRIMARY KEY (article_id, repo_id)
        )
        ",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create article_repositories table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_articles_processing_state ON articles(processing_state)",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create articles state index")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_code_repositories_status ON code_repositories(archival_status)",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create repository status index")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_article_repositories_repo ON article_repositories(repo_id)",
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create link repo index")?;

    Ok(())
}
