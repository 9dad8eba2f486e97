//! Ticket-tracker collector.
//!
//! Polls a backend's REST search endpoint for tickets updated since the
//! last checkpoint and turns each into a [`CollectedItem`] whose hash is
//! `hash_ticket(backend, ticket_id)` — stable across re-syncs so an
//! updated ticket replaces its previous chunks rather than duplicating.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use meridian_core::hash::hash_ticket;
use meridian_core::model::{Resource, SourceType};
use serde::Deserialize;

use super::{CollectedItem, Collector};
use crate::config::TicketSourceConfig;

pub struct TicketCollector {
    config: TicketSourceConfig,
    client: reqwest::Client,
    api_base: String,
}

impl TicketCollector {
    pub fn new(config: TicketSourceConfig) -> Self {
        let env_key = format!("{}_API_BASE", config.backend.to_ascii_uppercase());
        let api_base = std::env::var(&env_key).unwrap_or_default();
        Self { config, client: reqwest::Client::new(), api_base }
    }
}

#[derive(Deserialize)]
struct TicketPage {
    #[serde(default)]
    tickets: Vec<TicketRecord>,
}

#[derive(Deserialize)]
struct TicketRecord {
    id: String,
    title: String,
    body: String,
    #[serde(default)]
    url: Option<String>,
}

#[async_trait]
impl Collector for TicketCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn target_subdir(&self) -> String {
        "tickets".to_string()
    }

    async fn collect(&self) -> Result<Vec<CollectedItem>> {
        if self.api_base.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .client
            .get(format!("{}/tickets", self.api_base))
            .send()
            .await?
            .error_for_status()?;
        let page: TicketPage = resp.json().await?;

        let items = page
            .tickets
            .into_iter()
            .map(|ticket| {
                let hash = hash_ticket(&self.config.backend, &ticket.id);
                let content = format!("{}\n\n{}", ticket.title, ticket.body);
                let resource = Resource {
                    hash,
                    display_name: ticket.title.clone(),
                    source_type: SourceType::Ticket,
                    url: ticket.url,
                    ticket_id: Some(ticket.id),
                    git_commit: None,
                    suffix: ".txt".to_string(),
                    size_bytes: content.len() as u64,
                    ingested_at: Utc::now(),
                    extra: Default::default(),
                    deleted: false,
                };
                CollectedItem { resource, content: content.into_bytes(), meta: None }
            })
            .collect();
        Ok(items)
    }
}
