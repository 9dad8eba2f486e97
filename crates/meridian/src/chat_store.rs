//! C5: chat and trace store.
//!
//! Every write that can race with another turn on the same conversation
//! (append_message, start/finish trace) is serialized through a
//! per-conversation [`tokio::sync::Mutex`] held in a [`DashMap`] — the
//! same at-most-one-writer pattern [`crate::schedule::Scheduler`] uses
//! per source, applied here per conversation instead.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use meridian_core::model::{
    AbComparison, AbPreference, Conversation, DocumentSelection, Feedback, FeedbackFlags, FeedbackKind, Message, Sender, Trace, TraceEvent,
    TraceStatus, TraceTotals,
};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct ChatStore {
    pool: SqlitePool,
    turn_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, turn_locks: DashMap::new() }
    }

    fn lock_for(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        self.turn_locks.entry(conversation_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn create_conversation(&self, user_id: Option<String>, client_id: String, title: Option<String>) -> Result<Conversation> {
        let conversation = Conversation {
            conversation_id: Uuid::new_v4().to_string(),
            user_id,
            client_id,
            title,
            created_at: Utc::now(),
            last_message_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO conversations (conversation_id, user_id, client_id, title, created_at, last_message_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.conversation_id)
        .bind(&conversation.user_id)
        .bind(&conversation.client_id)
        .bind(&conversation.title)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.last_message_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(conversation)
    }

    /// Appends a message and bumps `last_message_at`. Serialized per
    /// conversation so two turns never interleave their message_id order.
    pub async fn append_message(&self, conversation_id: &str, sender: Sender, content: &str, model_used: Option<&str>, pipeline_used: Option<&str>, link: Option<&str>, context: Option<serde_json::Value>) -> Result<Message> {
        let lock = self.lock_for(conversation_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let sender_str = serde_json::to_value(sender)?.as_str().context("sender must serialize to a string")?.to_string();
        let context_json = context.as_ref().map(|c| c.to_string());

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO messages (conversation_id, sender, content, model_used, pipeline_used, link, context_json, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation_id)
        .bind(&sender_str)
        .bind(content)
        .bind(model_used)
        .bind(pipeline_used)
        .bind(link)
        .bind(&context_json)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_message_at = ? WHERE conversation_id = ?")
            .bind(now.to_rfc3339())
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Message {
            message_id: result.last_insert_rowid(),
            conversation_id: conversation_id.to_string(),
            sender,
            content: content.to_string(),
            model_used: model_used.map(String::from),
            pipeline_used: pipeline_used.map(String::from),
            link: link.map(String::from),
            context,
            timestamp: now,
        })
    }

    pub async fn load_conversation(&self, conversation_id: &str) -> Result<Option<(Conversation, Vec<Message>)>> {
        let Some(row) = sqlx::query("SELECT conversation_id, user_id, client_id, title, created_at, last_message_at FROM conversations WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let conversation = Conversation {
            conversation_id: row.get("conversation_id"),
            user_id: row.get("user_id"),
            client_id: row.get("client_id"),
            title: row.get("title"),
            created_at: parse_ts(row.get("created_at")),
            last_message_at: parse_ts(row.get("last_message_at")),
        };

        let rows = sqlx::query(
            "SELECT message_id, sender, content, model_used, pipeline_used, link, context_json, timestamp FROM messages WHERE conversation_id = ? ORDER BY message_id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let messages = rows
            .into_iter()
            .map(|row| {
                let sender_str: String = row.get("sender");
                let context_json: Option<String> = row.get("context_json");
                Message {
                    message_id: row.get("message_id"),
                    conversation_id: conversation_id.to_string(),
                    sender: serde_json::from_value(serde_json::Value::String(sender_str)).unwrap_or(Sender::User),
                    content: row.get("content"),
                    model_used: row.get("model_used"),
                    pipeline_used: row.get("pipeline_used"),
                    link: row.get("link"),
                    context: context_json.and_then(|j| serde_json::from_str(&j).ok()),
                    timestamp: parse_ts(row.get("timestamp")),
                }
            })
            .collect();

        Ok(Some((conversation, messages)))
    }

    pub async fn list_conversations(&self, client_id: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query("SELECT conversation_id, user_id, client_id, title, created_at, last_message_at FROM conversations WHERE client_id = ? ORDER BY last_message_at DESC")
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Conversation {
                conversation_id: row.get("conversation_id"),
                user_id: row.get("user_id"),
                client_id: row.get("client_id"),
                title: row.get("title"),
                created_at: parse_ts(row.get("created_at")),
                last_message_at: parse_ts(row.get("last_message_at")),
            })
            .collect())
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM trace_events WHERE trace_id IN (SELECT trace_id FROM traces WHERE conversation_id = ?)")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM traces WHERE conversation_id = ?").bind(conversation_id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM feedback WHERE message_id IN (SELECT message_id FROM messages WHERE conversation_id = ?)")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM document_selection WHERE conversation_id = ?").bind(conversation_id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM ab_comparisons WHERE conversation_id = ?").bind(conversation_id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?").bind(conversation_id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM conversations WHERE conversation_id = ?").bind(conversation_id).execute(&mut *tx).await?;
        tx.commit().await?;
        self.turn_locks.remove(conversation_id);
        Ok(())
    }

    pub async fn record_feedback(&self, message_id: i64, kind: FeedbackKind, flags: FeedbackFlags, text: Option<String>) -> Result<Feedback> {
        let feedback = Feedback { message_id, kind, flags, text, feedback_ts: Utc::now() };
        let kind_str = serde_json::to_value(feedback.kind)?.as_str().context("kind must serialize to a string")?.to_string();
        sqlx::query(
            "INSERT INTO feedback (message_id, feedback_ts, kind, incorrect, unhelpful, inappropriate, text) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(feedback.message_id)
        .bind(feedback.feedback_ts.to_rfc3339())
        .bind(&kind_str)
        .bind(feedback.flags.incorrect)
        .bind(feedback.flags.unhelpful)
        .bind(feedback.flags.inappropriate)
        .bind(&feedback.text)
        .execute(&self.pool)
        .await?;
        Ok(feedback)
    }

    pub async fn start_trace(&self, conversation_id: &str, message_id: Option<i64>, pipeline_name: &str) -> Result<Trace> {
        let trace = Trace {
            trace_id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            message_id,
            pipeline_name: pipeline_name.to_string(),
            events: Vec::new(),
            status: TraceStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            totals: TraceTotals::default(),
        };
        sqlx::query("INSERT INTO traces (trace_id, conversation_id, message_id, pipeline_name, status, started_at, completed_at, totals_json) VALUES (?, ?, ?, ?, ?, ?, NULL, ?)")
            .bind(&trace.trace_id)
            .bind(&trace.conversation_id)
            .bind(trace.message_id)
            .bind(&trace.pipeline_name)
            .bind("running")
            .bind(trace.started_at.to_rfc3339())
            .bind(serde_json::to_string(&trace.totals)?)
            .execute(&self.pool)
            .await?;
        Ok(trace)
    }

    /// Appends one trace event at the next sequence number. Rejects an
    /// event that would violate [`Trace::can_append`]'s ordering or
    /// terminal-status invariant.
    pub async fn append_trace_event(&self, trace_id: &str, event: TraceEvent) -> Result<()> {
        let row = sqlx::query("SELECT status FROM traces WHERE trace_id = ?").bind(trace_id).fetch_optional(&self.pool).await?;
        let Some(row) = row else { anyhow::bail!("unknown trace: {trace_id}") };
        let status: String = row.get("status");
        if status != "running" {
            anyhow::bail!("cannot append to a terminal trace: {trace_id}");
        }

        let last_timestamp: Option<String> =
            sqlx::query_scalar("SELECT timestamp FROM trace_events WHERE trace_id = ? ORDER BY seq DESC LIMIT 1").bind(trace_id).fetch_optional(&self.pool).await?;
        if let Some(last_timestamp) = last_timestamp {
            if event.timestamp() < parse_ts(last_timestamp) {
                anyhow::bail!("event timestamp precedes the last event on trace {trace_id}");
            }
        }

        let seq_row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(seq), -1) + 1 FROM trace_events WHERE trace_id = ?")
            .bind(trace_id)
            .fetch_one(&self.pool)
            .await?;

        sqlx::query("INSERT INTO trace_events (trace_id, seq, event_json, timestamp) VALUES (?, ?, ?, ?)")
            .bind(trace_id)
            .bind(seq_row.0)
            .bind(serde_json::to_string(&event)?)
            .bind(event.timestamp().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn finish_trace(&self, trace_id: &str, status: TraceStatus, totals: TraceTotals) -> Result<()> {
        let status_str = serde_json::to_value(status)?.as_str().context("status must serialize to a string")?.to_string();
        sqlx::query("UPDATE traces SET status = ?, completed_at = ?, totals_json = ? WHERE trace_id = ?")
            .bind(&status_str)
            .bind(Utc::now().to_rfc3339())
            .bind(serde_json::to_string(&totals)?)
            .bind(trace_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Marks a still-running trace cancelled; used by `POST /chat/cancel`.
    pub async fn cancel_trace(&self, trace_id: &str) -> Result<()> {
        self.finish_trace(trace_id, TraceStatus::Cancelled, TraceTotals::default()).await
    }

    pub async fn load_trace(&self, trace_id: &str) -> Result<Option<Trace>> {
        let Some(row) = sqlx::query("SELECT conversation_id, message_id, pipeline_name, status, started_at, completed_at, totals_json FROM traces WHERE trace_id = ?")
            .bind(trace_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let status_str: String = row.get("status");
        let totals_json: String = row.get("totals_json");
        let completed_at: Option<String> = row.get("completed_at");

        let event_rows = sqlx::query("SELECT event_json FROM trace_events WHERE trace_id = ? ORDER BY seq ASC").bind(trace_id).fetch_all(&self.pool).await?;
        let events = event_rows
            .into_iter()
            .filter_map(|r| {
                let json: String = r.get("event_json");
                serde_json::from_str(&json).ok()
            })
            .collect();

        Ok(Some(Trace {
            trace_id: trace_id.to_string(),
            conversation_id: row.get("conversation_id"),
            message_id: row.get("message_id"),
            pipeline_name: row.get("pipeline_name"),
            events,
            status: serde_json::from_value(serde_json::Value::String(status_str)).unwrap_or(TraceStatus::Failed),
            started_at: parse_ts(row.get("started_at")),
            completed_at: completed_at.map(|s| parse_ts(s)),
            totals: serde_json::from_str(&totals_json).unwrap_or_default(),
        }))
    }

    pub async fn trace_id_for_message(&self, message_id: i64) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT trace_id FROM traces WHERE message_id = ? ORDER BY started_at DESC LIMIT 1")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id,)| id))
    }

    pub async fn create_ab_comparison(&self, conversation_id: &str, user_prompt_message_id: i64, config_a: serde_json::Value, config_b: serde_json::Value, is_a_first: bool) -> Result<AbComparison> {
        let comparison = AbComparison {
            comparison_id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            user_prompt_message_id,
            response_a_message_id: None,
            response_b_message_id: None,
            config_a,
            config_b,
            is_a_first,
            preference: None,
        };
        sqlx::query("INSERT INTO ab_comparisons (comparison_id, conversation_id, user_prompt_message_id, response_a_message_id, response_b_message_id, config_a_json, config_b_json, is_a_first, preference) VALUES (?, ?, ?, NULL, NULL, ?, ?, ?, NULL)")
            .bind(&comparison.comparison_id)
            .bind(&comparison.conversation_id)
            .bind(comparison.user_prompt_message_id)
            .bind(comparison.config_a.to_string())
            .bind(comparison.config_b.to_string())
            .bind(comparison.is_a_first)
            .execute(&self.pool)
            .await?;
        Ok(comparison)
    }

    pub async fn set_ab_responses(&self, comparison_id: &str, response_a_message_id: Option<i64>, response_b_message_id: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE ab_comparisons SET response_a_message_id = ?, response_b_message_id = ? WHERE comparison_id = ?")
            .bind(response_a_message_id)
            .bind(response_b_message_id)
            .bind(comparison_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Write-once: rejects a second call once a preference is recorded.
    pub async fn record_ab_preference(&self, comparison_id: &str, preference: AbPreference) -> Result<()> {
        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT preference FROM ab_comparisons WHERE comparison_id = ?")
            .bind(comparison_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some((existing,)) = row else { anyhow::bail!("unknown ab comparison: {comparison_id}") };
        if existing.is_some() {
            anyhow::bail!("ab preference for {comparison_id} is already set");
        }
        let pref_str = serde_json::to_value(preference)?.as_str().context("preference must serialize to a string")?.to_string();
        sqlx::query("UPDATE ab_comparisons SET preference = ? WHERE comparison_id = ?").bind(&pref_str).bind(comparison_id).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn set_document_enabled(&self, conversation_id: &str, resource_hash: &str, enabled: bool) -> Result<()> {
        sqlx::query("INSERT INTO document_selection (conversation_id, resource_hash, enabled) VALUES (?, ?, ?) ON CONFLICT(conversation_id, resource_hash) DO UPDATE SET enabled = excluded.enabled")
            .bind(conversation_id)
            .bind(resource_hash)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Returns the per-conversation [`DocumentSelection`] override set.
    pub async fn document_selection(&self, conversation_id: &str) -> Result<DocumentSelection> {
        let rows: Vec<(String, bool)> = sqlx::query_as("SELECT resource_hash, enabled FROM document_selection WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await?;
        let overrides: HashMap<String, bool> = rows.into_iter().collect();
        Ok(DocumentSelection { conversation_id: conversation_id.to_string(), overrides })
    }

    pub async fn record_message_timing(&self, message_id: i64, duration_ms: i64) -> Result<()> {
        sqlx::query("INSERT INTO message_timings (message_id, duration_ms) VALUES (?, ?) ON CONFLICT(message_id) DO UPDATE SET duration_ms = excluded.duration_ms")
            .bind(message_id)
            .bind(duration_ms)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_ts(value: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&value).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn test_store() -> ChatStore {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await.unwrap();
        crate::migrate::run(&pool).await.unwrap();
        ChatStore::new(pool)
    }

    #[tokio::test]
    async fn create_then_append_then_load_round_trips() {
        let store = test_store().await;
        let convo = store.create_conversation(None, "client-1".to_string(), None).await.unwrap();
        store.append_message(&convo.conversation_id, Sender::User, "hello", None, None, None, None).await.unwrap();
        store.append_message(&convo.conversation_id, Sender::Assistant, "hi there", Some("gpt"), Some("qa"), None, None).await.unwrap();

        let (loaded, messages) = store.load_conversation(&convo.conversation_id).await.unwrap().unwrap();
        assert_eq!(loaded.conversation_id, convo.conversation_id);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].model_used.as_deref(), Some("gpt"));
    }

    #[tokio::test]
    async fn delete_conversation_cascades() {
        let store = test_store().await;
        let convo = store.create_conversation(None, "client-1".to_string(), None).await.unwrap();
        store.append_message(&convo.conversation_id, Sender::User, "hi", None, None, None, None).await.unwrap();
        store.delete_conversation(&convo.conversation_id).await.unwrap();
        assert!(store.load_conversation(&convo.conversation_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trace_events_append_in_order() {
        let store = test_store().await;
        let convo = store.create_conversation(None, "client-1".to_string(), None).await.unwrap();
        let trace = store.start_trace(&convo.conversation_id, None, "qa").await.unwrap();
        store.append_trace_event(&trace.trace_id, TraceEvent::Chunk { content: "a".to_string(), timestamp: Utc::now() }).await.unwrap();
        store.append_trace_event(&trace.trace_id, TraceEvent::Done { timestamp: Utc::now() }).await.unwrap();
        store.finish_trace(&trace.trace_id, TraceStatus::Completed, TraceTotals::default()).await.unwrap();

        let loaded = store.load_trace(&trace.trace_id).await.unwrap().unwrap();
        assert_eq!(loaded.events.len(), 2);
        assert_eq!(loaded.status, TraceStatus::Completed);
    }

    #[tokio::test]
    async fn ab_preference_is_write_once() {
        let store = test_store().await;
        let convo = store.create_conversation(None, "client-1".to_string(), None).await.unwrap();
        let msg = store.append_message(&convo.conversation_id, Sender::User, "q", None, None, None, None).await.unwrap();
        let comparison = store.create_ab_comparison(&convo.conversation_id, msg.message_id, serde_json::json!({}), serde_json::json!({}), true).await.unwrap();
        store.record_ab_preference(&comparison.comparison_id, AbPreference::A).await.unwrap();
        assert!(store.record_ab_preference(&comparison.comparison_id, AbPreference::B).await.is_err());
    }

    #[tokio::test]
    async fn document_selection_defaults_to_enabled() {
        let store = test_store().await;
        let convo = store.create_conversation(None, "client-1".to_string(), None).await.unwrap();
        let selection = store.document_selection(&convo.conversation_id).await.unwrap();
        assert!(selection.is_enabled("any-hash"));
        store.set_document_enabled(&convo.conversation_id, "h1", false).await.unwrap();
        let selection = store.document_selection(&convo.conversation_id).await.unwrap();
        assert!(!selection.is_enabled("h1"));
        assert!(selection.is_enabled("h2"));
    }
}
