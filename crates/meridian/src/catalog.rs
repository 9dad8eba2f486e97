//! C1: content-addressed filesystem catalog.
//!
//! Resource bytes live under `{data_root}/{websites,tickets,uploads,git}`;
//! two YAML indexes (`hash -> relative path`, `hash -> metadata path`) are
//! held in memory behind a writer lock and flushed to disk atomically
//! (write to a `.tmp` sibling, fsync, rename).

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use meridian_core::model::{Resource, ResourceMeta};

const FILE_INDEX: &str = ".index/file_index.yaml";
const METADATA_INDEX: &str = ".index/metadata_index.yaml";

struct Indexes {
    file_index: HashMap<String, String>,
    metadata_index: HashMap<String, String>,
    resources: HashMap<String, Resource>,
    dirty: bool,
}

/// The catalog and content store. `data_root` is the external-contract
/// on-disk layout root described in the specification.
pub struct ContentStore {
    data_root: PathBuf,
    indexes: RwLock<Indexes>,
}

impl ContentStore {
    pub fn open(data_root: impl Into<PathBuf>) -> Result<Self> {
        let data_root = data_root.into();
        fs::create_dir_all(data_root.join(".index"))?;

        let file_index = load_yaml_map(&data_root.join(FILE_INDEX))?;
        let metadata_index = load_yaml_map(&data_root.join(METADATA_INDEX))?;

        Ok(Self {
            data_root,
            indexes: RwLock::new(Indexes { file_index, metadata_index, resources: HashMap::new(), dirty: false }),
        })
    }

    /// Persists `content` at `{target_dir}/{hash}{suffix}`, writes a
    /// `.meta` sidecar if `meta` is present, and updates both indexes.
    /// Fails if the resolved path escapes `data_root`.
    pub fn persist(&self, target_subdir: &str, resource: &Resource, content: &[u8], meta: Option<&ResourceMeta>) -> Result<PathBuf> {
        let dir = self.data_root.join(target_subdir);
        if !dir.starts_with(&self.data_root) {
            bail!("refusing to write outside data_root");
        }
        fs::create_dir_all(&dir)?;

        let rel_path = Path::new(target_subdir).join(format!("{}{}", resource.hash, resource.suffix));
        let abs_path = self.data_root.join(&rel_path);
        fs::write(&abs_path, content).with_context(|| format!("writing {}", abs_path.display()))?;

        let mut meta_rel = None;
        if let Some(meta) = meta {
            let meta_path = abs_path.with_extension(format!("{}.meta", resource.suffix.trim_start_matches('.')));
            let yaml = serde_yaml::to_string(meta)?;
            fs::write(&meta_path, yaml)?;
            meta_rel = Some(meta_path.strip_prefix(&self.data_root)?.to_string_lossy().to_string());
        }

        let mut indexes = self.indexes.write().unwrap();
        indexes.file_index.insert(resource.hash.clone(), rel_path.to_string_lossy().to_string());
        if let Some(meta_rel) = meta_rel {
            indexes.metadata_index.insert(resource.hash.clone(), meta_rel);
        }
        indexes.resources.insert(resource.hash.clone(), resource.clone());
        indexes.dirty = true;

        Ok(abs_path)
    }

    /// Removes a resource's file, sidecar, and index entries.
    pub fn delete(&self, hash: &str, flush: bool) -> Result<()> {
        let mut indexes = self.indexes.write().unwrap();
        if let Some(rel) = indexes.file_index.remove(hash) {
            let _ = fs::remove_file(self.data_root.join(&rel));
        }
        if let Some(rel) = indexes.metadata_index.remove(hash) {
            let _ = fs::remove_file(self.data_root.join(&rel));
        }
        indexes.resources.remove(hash);
        indexes.dirty = true;
        drop(indexes);
        if flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Soft-deletes a resource: sets the tombstone bit without removing
    /// bytes or index entries. Never removed until [`Self::gc`].
    pub fn tombstone(&self, hash: &str) -> Result<()> {
        let mut indexes = self.indexes.write().unwrap();
        if let Some(resource) = indexes.resources.get_mut(hash) {
            resource.deleted = true;
            indexes.dirty = true;
        }
        Ok(())
    }

    /// Recursively clears a subdirectory and the index rows under it.
    pub fn reset(&self, subdir: &str) -> Result<()> {
        let dir = self.data_root.join(subdir);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        let mut indexes = self.indexes.write().unwrap();
        let prefix = format!("{subdir}/");
        indexes.file_index.retain(|_, path| !path.starts_with(&prefix));
        indexes.metadata_index.retain(|_, path| !path.starts_with(&prefix));
        let kept: HashSet<String> = indexes.file_index.keys().cloned().collect();
        indexes.resources.retain(|hash, _| kept.contains(hash));
        indexes.dirty = true;
        Ok(())
    }

    /// Atomically writes both indexes to disk: write-new, fsync, rename.
    pub fn flush(&self) -> Result<()> {
        let mut indexes = self.indexes.write().unwrap();
        if !indexes.dirty {
            return Ok(());
        }
        write_yaml_atomic(&self.data_root.join(FILE_INDEX), &indexes.file_index)?;
        write_yaml_atomic(&self.data_root.join(METADATA_INDEX), &indexes.metadata_index)?;
        indexes.dirty = false;
        Ok(())
    }

    /// Returns the current bytes and metadata for `hash`, or `None` if
    /// not present in the catalog.
    pub fn lookup(&self, hash: &str) -> Result<Option<(Vec<u8>, Option<ResourceMeta>)>> {
        let indexes = self.indexes.read().unwrap();
        let Some(rel) = indexes.file_index.get(hash) else { return Ok(None) };
        let content = fs::read(self.data_root.join(rel))?;
        let meta = match indexes.metadata_index.get(hash) {
            Some(meta_rel) => {
                let text = fs::read_to_string(self.data_root.join(meta_rel))?;
                Some(serde_yaml::from_str(&text)?)
            }
            None => None,
        };
        Ok(Some((content, meta)))
    }

    pub fn get_resource(&self, hash: &str) -> Option<Resource> {
        self.indexes.read().unwrap().resources.get(hash).cloned()
    }

    pub fn all_resources(&self) -> Vec<Resource> {
        self.indexes.read().unwrap().resources.values().cloned().collect()
    }

    /// Permanently removes tombstoned resources older than
    /// `retention_days`.
    pub fn gc(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days);
        let to_remove: Vec<String> = {
            let indexes = self.indexes.read().unwrap();
            indexes
                .resources
                .values()
                .filter(|r| r.deleted && r.ingested_at < cutoff)
                .map(|r| r.hash.clone())
                .collect()
        };
        for hash in &to_remove {
            self.delete(hash, false)?;
        }
        if !to_remove.is_empty() {
            self.flush()?;
        }
        Ok(to_remove.len())
    }
}

fn load_yaml_map(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(HashMap::new());
    }
    Ok(serde_yaml::from_str(&text)?)
}

fn write_yaml_atomic(path: &Path, map: &HashMap<String, String>) -> Result<()> {
    let tmp_path = path.with_extension("yaml.tmp");
    let yaml = serde_yaml::to_string(map)?;
    fs::write(&tmp_path, yaml)?;
    {
        let file = File::open(&tmp_path)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::model::SourceType;

    fn resource(hash: &str) -> Resource {
        Resource {
            hash: hash.to_string(),
            display_name: "test".to_string(),
            source_type: SourceType::Web,
            url: Some("https://example.com".to_string()),
            ticket_id: None,
            git_commit: None,
            suffix: ".html".to_string(),
            size_bytes: 5,
            ingested_at: Utc::now(),
            extra: HashMap::new(),
            deleted: false,
        }
    }

    #[test]
    fn persist_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let r = resource("abc123");
        store.persist("websites", &r, b"hello", None).unwrap();
        let (bytes, _) = store.lookup("abc123").unwrap().unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn flush_then_reopen_preserves_the_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ContentStore::open(dir.path()).unwrap();
            let r = resource("xyz");
            store.persist("websites", &r, b"world", None).unwrap();
            store.flush().unwrap();
        }
        let reopened = ContentStore::open(dir.path()).unwrap();
        let (bytes, _) = reopened.lookup("xyz").unwrap().unwrap();
        assert_eq!(bytes, b"world");
    }

    #[test]
    fn delete_removes_bytes_and_index_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let r = resource("del1");
        store.persist("websites", &r, b"bye", None).unwrap();
        store.delete("del1", true).unwrap();
        assert!(store.lookup("del1").unwrap().is_none());
    }

    #[test]
    fn tombstone_marks_deleted_without_removing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path()).unwrap();
        let r = resource("tomb1");
        store.persist("websites", &r, b"still here", None).unwrap();
        store.tombstone("tomb1").unwrap();
        assert!(store.lookup("tomb1").unwrap().is_some());
        assert!(store.get_resource("tomb1").unwrap().deleted);
    }
}
