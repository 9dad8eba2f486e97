//! Cron-driven ingestion scheduler.
//!
//! Each configured source with a `cron` expression gets one background
//! task. [`Scheduler`] tracks a [`CancellationToken`] per source name in
//! a [`DashMap`] so at most one run is ever in flight for a given source
//! — a new tick finding the previous run still going is skipped, not
//! queued, and `reload` cancels and respawns every task from a fresh
//! config.

use std::str::FromStr;
use std::sync::Arc;

use cron::Schedule;
use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::ContentStore;
use crate::collectors::{Collector, GitCollector, LinkScraperCollector, TicketCollector};
use crate::config::Config;
use crate::embedding_provider::Embedder;
use crate::ingest;

pub struct Scheduler {
    running: Arc<DashMap<String, CancellationToken>>,
    pool: SqlitePool,
    catalog: Arc<ContentStore>,
    config: Arc<Config>,
    embedder: Arc<Option<Box<dyn Embedder>>>,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, catalog: Arc<ContentStore>, config: Arc<Config>, embedder: Arc<Option<Box<dyn Embedder>>>) -> Self {
        Self { running: Arc::new(DashMap::new()), pool, catalog, config, embedder }
    }

    /// Cancels every running task and spawns fresh ones from the current
    /// `self.config`. Used by `POST /ingest/reload-schedules`.
    pub fn reload(&self) {
        for entry in self.running.iter() {
            entry.value().cancel();
        }
        self.running.clear();

        for web in &self.config.sources.web {
            if let Some(cron_expr) = &web.cron {
                self.spawn(web.name.clone(), cron_expr.clone(), web.reset_data, {
                    let web = web.clone();
                    move || Box::new(LinkScraperCollector::new(web.clone())) as Box<dyn Collector>
                });
            }
        }
        for git in &self.config.sources.git {
            if let Some(cron_expr) = &git.cron {
                let cache_root = self.config.global.data_root.clone();
                self.spawn(git.name.clone(), cron_expr.clone(), git.reset_data, {
                    let git = git.clone();
                    move || Box::new(GitCollector::new(git.clone(), cache_root.clone())) as Box<dyn Collector>
                });
            }
        }
        for ticket in &self.config.sources.tickets {
            if let Some(cron_expr) = &ticket.cron {
                self.spawn(ticket.name.clone(), cron_expr.clone(), ticket.reset_data, {
                    let ticket = ticket.clone();
                    move || Box::new(TicketCollector::new(ticket.clone())) as Box<dyn Collector>
                });
            }
        }
    }

    fn spawn<F>(&self, name: String, cron_expr: String, reset_data: bool, build: F)
    where
        F: Fn() -> Box<dyn Collector> + Send + Sync + 'static,
    {
        let schedule = match Schedule::from_str(&cron_expr) {
            Ok(s) => s,
            Err(e) => {
                error!(source = %name, cron = %cron_expr, error = %e, "invalid cron expression, source will not run");
                return;
            }
        };

        let token = CancellationToken::new();
        self.running.insert(name.clone(), token.clone());

        let pool = self.pool.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();
        let embedder = self.embedder.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            loop {
                let next = match schedule.upcoming(chrono::Utc).next() {
                    Some(t) => t,
                    None => break,
                };
                let now = chrono::Utc::now();
                let wait = (next - now).to_std().unwrap_or(std::time::Duration::from_secs(1));

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = token.cancelled() => break,
                }

                if running.get(&name).map(|t| t.is_cancelled()).unwrap_or(true) {
                    break;
                }

                let collector = build();
                info!(source = %name, "starting scheduled ingestion");
                let embedder_ref = embedder.as_ref().as_ref().map(|e| e.as_ref());
                match ingest::run_collector(collector.as_ref(), reset_data, &catalog, &pool, &config, embedder_ref).await {
                    Ok(report) => info!(source = %name, synced = report.items_synced, errors = report.errors.len(), "ingestion complete"),
                    Err(e) => warn!(source = %name, error = %e, "ingestion run failed"),
                }
            }
        });
    }
}
