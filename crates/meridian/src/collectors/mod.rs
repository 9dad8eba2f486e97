//! C3: ingestion collectors.
//!
//! A [`Collector`] turns one configured source into a batch of
//! [`CollectedItem`]s — raw content plus the [`Resource`] metadata the
//! catalog (C1) and chunk index (C2) need. Each source kind gets its own
//! collector; [`crate::schedule`] is what runs them on a cron cadence.

mod git;
mod ticket;
mod upload;
mod web;

pub use git::GitCollector;
pub use ticket::TicketCollector;
pub use upload::UploadCollector;
pub use web::LinkScraperCollector;

use async_trait::async_trait;
use meridian_core::model::{Resource, ResourceMeta};

pub struct CollectedItem {
    pub resource: Resource,
    pub content: Vec<u8>,
    pub meta: Option<ResourceMeta>,
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// The configured instance name, used in logs and as the scheduler's
    /// per-source lock key.
    fn name(&self) -> &str;
    /// The catalog subdirectory this collector's items are persisted
    /// under (`"websites"`, `"git/{repo}"`, `"tickets"`, `"uploads"`).
    fn target_subdir(&self) -> String;
    async fn collect(&self) -> anyhow::Result<Vec<CollectedItem>>;
}
