//! Idempotent schema migrations for the chunk/vector index (C2) and the
//! chat/trace store (C5). Every statement is `CREATE TABLE IF NOT EXISTS`
//! so `migrate` is safe to call on every startup.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run(pool: &SqlitePool) -> Result<()> {
    // C2: chunk/vector index. The catalog of record lives on disk (C1);
    // this table is the queryable projection `sync` maintains.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            resource_hash TEXT NOT NULL,
            chunk_index   INTEGER NOT NULL,
            text          TEXT NOT NULL,
            vector        BLOB,
            display_name  TEXT NOT NULL,
            source_url    TEXT,
            PRIMARY KEY (resource_hash, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_resource ON chunks(resource_hash)").execute(pool).await?;

    // C5: chat/trace store.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            conversation_id TEXT PRIMARY KEY,
            user_id         TEXT,
            client_id       TEXT NOT NULL,
            title           TEXT,
            created_at      TEXT NOT NULL,
            last_message_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            message_id      INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL REFERENCES conversations(conversation_id),
            sender          TEXT NOT NULL,
            content         TEXT NOT NULL,
            model_used      TEXT,
            pipeline_used   TEXT,
            link            TEXT,
            context_json    TEXT,
            timestamp       TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, message_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS traces (
            trace_id       TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            message_id     INTEGER,
            pipeline_name  TEXT NOT NULL,
            status         TEXT NOT NULL,
            started_at     TEXT NOT NULL,
            completed_at   TEXT,
            totals_json    TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trace_events (
            trace_id  TEXT NOT NULL REFERENCES traces(trace_id),
            seq       INTEGER NOT NULL,
            event_json TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            PRIMARY KEY (trace_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedback (
            message_id  INTEGER NOT NULL,
            feedback_ts TEXT NOT NULL,
            kind        TEXT NOT NULL,
            incorrect   INTEGER NOT NULL DEFAULT 0,
            unhelpful   INTEGER NOT NULL DEFAULT 0,
            inappropriate INTEGER NOT NULL DEFAULT 0,
            text        TEXT,
            PRIMARY KEY (message_id, feedback_ts)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ab_comparisons (
            comparison_id             TEXT PRIMARY KEY,
            conversation_id           TEXT NOT NULL,
            user_prompt_message_id    INTEGER NOT NULL,
            response_a_message_id     INTEGER,
            response_b_message_id     INTEGER,
            config_a_json             TEXT NOT NULL,
            config_b_json             TEXT NOT NULL,
            is_a_first                INTEGER NOT NULL,
            preference                TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_selection (
            conversation_id TEXT NOT NULL,
            resource_hash   TEXT NOT NULL,
            enabled         INTEGER NOT NULL,
            PRIMARY KEY (conversation_id, resource_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_timings (
            message_id  INTEGER PRIMARY KEY,
            duration_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            source     TEXT PRIMARY KEY,
            cursor     TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
