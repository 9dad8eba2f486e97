//! Upload collector.
//!
//! Unlike the other collectors this one is never scheduled: the HTTP
//! layer constructs it on demand, fed with exactly the one file the
//! caller just posted, and runs it inline through the same ingest path
//! every other source uses.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use meridian_core::hash::hash_upload;
use meridian_core::model::{Resource, SourceType};

use super::{CollectedItem, Collector};

pub struct UploadCollector {
    display_name: String,
    suffix: String,
    content: Vec<u8>,
}

impl UploadCollector {
    pub fn new(display_name: String, suffix: String, content: Vec<u8>) -> Self {
        Self { display_name, suffix, content }
    }
}

#[async_trait]
impl Collector for UploadCollector {
    fn name(&self) -> &str {
        "upload"
    }

    fn target_subdir(&self) -> String {
        "uploads".to_string()
    }

    async fn collect(&self) -> Result<Vec<CollectedItem>> {
        let hash = hash_upload(&self.content);
        let resource = Resource {
            hash,
            display_name: self.display_name.clone(),
            source_type: SourceType::Local,
            url: None,
            ticket_id: None,
            git_commit: None,
            suffix: self.suffix.clone(),
            size_bytes: self.content.len() as u64,
            ingested_at: Utc::now(),
            extra: Default::default(),
            deleted: false,
        };
        Ok(vec![CollectedItem { resource, content: self.content.clone(), meta: None }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_hash_is_content_addressed() {
        let a = UploadCollector::new("a.txt".to_string(), ".txt".to_string(), b"same bytes".to_vec());
        let b = UploadCollector::new("b.txt".to_string(), ".txt".to_string(), b"same bytes".to_vec());
        let item_a = a.collect().await.unwrap();
        let item_b = b.collect().await.unwrap();
        assert_eq!(item_a[0].resource.hash, item_b[0].resource.hash);
    }
}
