//! Git repository collector.
//!
//! Clones (or updates, via fetch + hard reset) a repository into a cache
//! directory under the catalog's data root, then walks it — optionally
//! restricted to an mkdocs-style doc subtree, code files, or README-only
//! — producing one [`CollectedItem`] per matched file.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use meridian_core::hash::hash_web;
use meridian_core::model::{Resource, SourceType};
use walkdir::WalkDir;

use super::{CollectedItem, Collector};
use crate::config::GitSourceConfig;

const CODE_GLOBS: &[&str] = &["**/*.rs", "**/*.py", "**/*.js", "**/*.ts", "**/*.go", "**/*.java", "**/*.c", "**/*.cpp", "**/*.h"];

pub struct GitCollector {
    config: GitSourceConfig,
    cache_root: PathBuf,
}

impl GitCollector {
    pub fn new(config: GitSourceConfig, cache_root: PathBuf) -> Self {
        Self { config, cache_root }
    }

    fn repo_dir(&self) -> PathBuf {
        self.cache_root.join(".git-cache").join(hash_web(&self.config.url))
    }
}

#[async_trait]
impl Collector for GitCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn target_subdir(&self) -> String {
        format!("git/{}", self.config.name)
    }

    async fn collect(&self) -> Result<Vec<CollectedItem>> {
        let config = self.config.clone();
        let repo_dir = self.repo_dir();
        let name = self.config.name.clone();
        tokio::task::spawn_blocking(move || scan_git(&name, &config, &repo_dir)).await?
    }
}

fn scan_git(name: &str, config: &GitSourceConfig, repo_dir: &Path) -> Result<Vec<CollectedItem>> {
    if repo_dir.join(".git").exists() {
        git_pull(repo_dir)?;
    } else {
        git_clone(&config.url, repo_dir)?;
    }

    let scan_root = match &config.mkdocs_subtree {
        Some(subtree) => repo_dir.join(subtree),
        None => repo_dir.to_path_buf(),
    };
    if !scan_root.exists() {
        bail!("git source '{name}' mkdocs_subtree does not exist in repo {}", config.url);
    }

    let head_sha = git_head_sha(repo_dir).unwrap_or_else(|_| "unknown".to_string());

    let include = if config.readme_only {
        build_globset(&["**/README.md".to_string(), "**/readme.md".to_string()])?
    } else if config.code {
        build_globset(&CODE_GLOBS.iter().map(|s| s.to_string()).collect::<Vec<_>>())?
    } else {
        build_globset(&["**/*.md".to_string(), "**/*.rst".to_string(), "**/*.txt".to_string()])?
    };
    let exclude = build_globset(&["**/.git/**".to_string(), "**/target/**".to_string(), "**/node_modules/**".to_string()])?;

    let mut items = Vec::new();
    for entry in WalkDir::new(&scan_root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(&scan_root).unwrap_or(entry.path());
        let rel_str = relative.to_string_lossy().to_string();
        if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }

        let content = std::fs::read(entry.path())?;
        let resource_id = format!("{}/{}", config.name, rel_str);
        let hash = hash_web(&format!("git:{}@{}:{}", config.url, head_sha, resource_id));
        let suffix = entry.path().extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();

        let resource = Resource {
            hash,
            display_name: rel_str.clone(),
            source_type: SourceType::Git,
            url: Some(build_web_url(&config.url, &head_sha, &rel_str)),
            ticket_id: None,
            git_commit: Some(head_sha.clone()),
            suffix,
            size_bytes: content.len() as u64,
            ingested_at: Utc::now(),
            extra: Default::default(),
            deleted: false,
        };
        items.push(CollectedItem { resource, content, meta: None });
    }

    items.sort_by(|a, b| a.resource.hash.cmp(&b.resource.hash));
    Ok(items)
}

fn git_clone(url: &str, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest.parent().unwrap_or(Path::new(".")))?;
    let output = Command::new("git")
        .args(["clone", "--depth", "1", url])
        .arg(dest)
        .output()
        .with_context(|| "failed to execute 'git clone'")?;
    if !output.status.success() {
        bail!("git clone failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(())
}

fn git_pull(repo_dir: &Path) -> Result<()> {
    let fetch = Command::new("git").args(["fetch", "--depth", "1", "origin"]).current_dir(repo_dir).output()?;
    if !fetch.status.success() {
        bail!("git fetch failed: {}", String::from_utf8_lossy(&fetch.stderr).trim());
    }
    let reset = Command::new("git").args(["reset", "--hard", "FETCH_HEAD"]).current_dir(repo_dir).output()?;
    if !reset.status.success() {
        bail!("git reset failed: {}", String::from_utf8_lossy(&reset.stderr).trim());
    }
    Ok(())
}

fn git_head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git").args(["rev-parse", "HEAD"]).current_dir(repo_dir).output()?;
    if !output.status.success() {
        bail!("git rev-parse HEAD failed");
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn build_web_url(repo_url: &str, sha: &str, relative_path: &str) -> String {
    if let Some(rest) = repo_url.strip_prefix("git@github.com:") {
        let repo = rest.trim_end_matches(".git");
        return format!("https://github.com/{repo}/blob/{sha}/{relative_path}");
    }
    if repo_url.contains("github.com") {
        let base = repo_url.trim_end_matches(".git");
        return format!("{base}/blob/{sha}/{relative_path}");
    }
    format!("git://{repo_url}/{relative_path}")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_github_blob_url() {
        let url = build_web_url("https://github.com/acme/platform.git", "abc123", "docs/guide.md");
        assert_eq!(url, "https://github.com/acme/platform/blob/abc123/docs/guide.md");
    }

    #[test]
    fn falls_back_for_non_github_hosts() {
        let url = build_web_url("https://git.example.org/acme/platform.git", "abc123", "a.md");
        assert!(url.starts_with("git://"));
    }
}
