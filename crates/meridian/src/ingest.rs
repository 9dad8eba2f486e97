//! C3 orchestration: run a collector, commit its output through the
//! catalog (C1) and the chunk index (C2).
//!
//! The commit point is C1's flush: a resource's bytes and sidecar are
//! written and the in-memory index marked dirty, then C2's `sync`
//! re-chunks and re-embeds it, and only after every item in the batch
//! has synced does the catalog flush its index to disk. A crash between
//! `persist` and `flush` just replays on the next sync; a crash after
//! `flush` leaves C2 one sync short of C1, which the next scheduled run
//! corrects since every sync is a full re-chunk, not a diff.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::catalog::ContentStore;
use crate::collectors::Collector;
use crate::config::Config;
use crate::embedding_provider::Embedder;
use crate::index;
use crate::loader;

pub struct IngestReport {
    pub source: String,
    pub items_seen: usize,
    pub items_synced: usize,
    pub errors: Vec<String>,
}

/// Runs one collector end to end, honoring `reset_data` by clearing the
/// source's catalog subtree and index rows first.
pub async fn run_collector(
    collector: &dyn Collector,
    reset_data: bool,
    catalog: &Arc<ContentStore>,
    pool: &SqlitePool,
    config: &Config,
    embedder: Option<&dyn Embedder>,
) -> Result<IngestReport> {
    let subdir = collector.target_subdir();
    if reset_data {
        catalog.reset(&subdir)?;
        info!(source = collector.name(), subdir = %subdir, "reset source before sync");
    }

    let items = collector.collect().await?;
    let mut synced = 0;
    let mut errors = Vec::new();
    let mut seen_hashes = HashSet::new();

    for item in &items {
        seen_hashes.insert(item.resource.hash.clone());
        let result = sync_one(catalog, pool, config, embedder, &subdir, item).await;
        match result {
            Ok(()) => synced += 1,
            Err(e) => {
                warn!(source = collector.name(), resource = %item.resource.hash, error = %e, "failed to sync item");
                errors.push(format!("{}: {e}", item.resource.hash));
            }
        }
    }

    catalog.flush()?;

    Ok(IngestReport { source: collector.name().to_string(), items_seen: items.len(), items_synced: synced, errors })
}

async fn sync_one(
    catalog: &Arc<ContentStore>,
    pool: &SqlitePool,
    config: &Config,
    embedder: Option<&dyn Embedder>,
    subdir: &str,
    item: &crate::collectors::CollectedItem,
) -> Result<()> {
    catalog.persist(subdir, &item.resource, &item.content, item.meta.as_ref())?;
    let text = loader::load_text(&item.resource.suffix, &item.content)?;
    index::sync_resource(
        pool,
        &item.resource,
        &text,
        config.data_manager.chunk_size,
        config.data_manager.chunk_overlap,
        embedder,
    )
    .await?;
    Ok(())
}
