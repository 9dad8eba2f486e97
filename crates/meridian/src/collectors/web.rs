//! Web link-scraping collector.
//!
//! Breadth-first crawl from a set of seed URLs, bounded by `depth` and
//! `max_pages`. Each fetched page becomes one [`CollectedItem`] hashed
//! by its URL (`hash_web`), matching the deterministic-resource-hash
//! rule documented for web sources.

use std::collections::{HashSet, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use meridian_core::hash::hash_web;
use meridian_core::model::{Resource, SourceType};

use super::{CollectedItem, Collector};
use crate::config::WebSourceConfig;

pub struct LinkScraperCollector {
    config: WebSourceConfig,
    client: reqwest::Client,
}

impl LinkScraperCollector {
    pub fn new(config: WebSourceConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }
}

#[async_trait]
impl Collector for LinkScraperCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn target_subdir(&self) -> String {
        "websites".to_string()
    }

    async fn collect(&self) -> Result<Vec<CollectedItem>> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<(String, u32)> = self.config.seed_urls.iter().map(|u| (u.clone(), 0)).collect();
        let mut items = Vec::new();
        let max_pages = self.config.max_pages.unwrap_or(u32::MAX) as usize;

        while let Some((url, depth)) = queue.pop_front() {
            if items.len() >= max_pages || visited.contains(&url) {
                continue;
            }
            visited.insert(url.clone());

            let Ok(resp) = self.client.get(&url).send().await else { continue };
            let Ok(body) = resp.text().await else { continue };

            let hash = hash_web(&url);
            let resource = Resource {
                hash: hash.clone(),
                display_name: url.clone(),
                source_type: SourceType::Web,
                url: Some(url.clone()),
                ticket_id: None,
                git_commit: None,
                suffix: ".html".to_string(),
                size_bytes: body.len() as u64,
                ingested_at: Utc::now(),
                extra: Default::default(),
                deleted: false,
            };
            items.push(CollectedItem { resource, content: body.clone().into_bytes(), meta: None });

            if depth < self.config.depth {
                for link in extract_links(&body, &url) {
                    if !visited.contains(&link) {
                        queue.push_back((link, depth + 1));
                    }
                }
            }
        }

        Ok(items)
    }
}

/// Extracts same-origin `href` targets from `<a>` tags, resolving
/// relative paths against `base_url`.
fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let Ok(base) = url::Url::parse(base_url) else { return Vec::new() };
    let mut out = Vec::new();
    let lower = html.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(rel) = lower[search_from..].find("href=") {
        let start = search_from + rel + 5;
        let Some(quote) = html.as_bytes().get(start).copied() else { break };
        if quote != b'"' && quote != b'\'' {
            search_from = start;
            continue;
        }
        let value_start = start + 1;
        let Some(end_offset) = html[value_start..].find(quote as char) else { break };
        let href = &html[value_start..value_start + end_offset];
        if let Ok(resolved) = base.join(href) {
            if resolved.host() == base.host() {
                out.push(resolved.to_string());
            }
        }
        search_from = value_start + end_offset;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_same_origin_links_only() {
        let html = r#"<a href="/docs/page2">next</a><a href="https://other.example/x">ext</a>"#;
        let links = extract_links(html, "https://example.com/docs/page1");
        assert_eq!(links, vec!["https://example.com/docs/page2"]);
    }

    #[test]
    fn malformed_base_url_yields_no_links() {
        assert!(extract_links("<a href=\"/x\">x</a>", "not a url").is_empty());
    }
}
