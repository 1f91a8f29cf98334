//! SQLite connection pool for the relational side of the knowledge base
//! (documents, sources, crawl history, queries, coverage gaps). The index
//! artifacts live in flat files and never touch this pool.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::DbConfig;

/// Open the knowledge-base database, creating the file and its parent
/// directory on first use. WAL mode keeps searches readable while an
/// ingest batch commits.
pub async fn connect(config: &DbConfig) -> Result<SqlitePool> {
    if let Some(parent) = config.path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create database directory {}", parent.display())
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", config.path.display()))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_creates_file_and_parent_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let config = DbConfig {
            path: tmp.path().join("nested/store/kb.sqlite"),
        };
        let pool = connect(&config).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
        pool.close().await;
        assert!(config.path.exists());
    }
}
