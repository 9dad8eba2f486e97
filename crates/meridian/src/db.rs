//! SQLite connection management.
//!
//! WAL journal mode is enabled so retrieval reads never block ingestion
//! or chat writes. The database file and its parent directory are created
//! automatically if missing.

use std::str::FromStr;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::Config;

/// Opens (creating if necessary) the connection pool backing both the
/// chunk/vector index (C2) and the chat/trace store (C5).
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.global.data_root.join("meridian.db");
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
    Ok(pool)
}
