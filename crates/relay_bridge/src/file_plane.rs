//! File Plane (§4.I): source of truth for client-uploaded inputs, and the
//! read path for result artifacts in both single-node and fleet mode.

use crate::client::NodeClient;
use chrono::Utc;
use relay_db::uploads::{UploadRecord, UploadRegistry};
use relay_db::DbError;
use relay_dispatch::NodeManager;
use relay_ids::{ClientId, FileId};
use relay_protocol::job::ArtifactLocator;
use relay_protocol::node::NodeStatus;
use relay_security::{DownloadToken, TokenError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum FilePlaneError {
    #[error("file not found")]
    NotFound,
    #[error("path escapes the upload root")]
    PathTraversal,
    #[error("download token rejected: {0}")]
    Token(#[from] TokenError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("all nodes failed to serve the file")]
    AllNodesFailed,
}

struct CacheEntry {
    bytes: Vec<u8>,
    content_type: Option<String>,
    fetched_at: Instant,
}

/// Optional proxied-result cache, keyed by `(node_id, relative_path)` with a
/// single TTL for the whole plane (§4.I "caching is optional, if present
/// keyed by (node-id, relative-path) with a TTL").
struct ResultCache {
    ttl: Duration,
    entries: RwLock<std::collections::HashMap<(String, String), CacheEntry>>,
}

impl ResultCache {
    fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(std::collections::HashMap::new()) }
    }

    async fn get(&self, key: &(String, String)) -> Option<(Vec<u8>, Option<String>)> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.fetched_at.elapsed() > self.ttl {
            return None;
        }
        Some((entry.bytes.clone(), entry.content_type.clone()))
    }

    async fn put(&self, key: (String, String), bytes: Vec<u8>, content_type: Option<String>) {
        self.entries
            .write()
            .await
            .insert(key, CacheEntry { bytes, content_type, fetched_at: Instant::now() });
    }
}

pub struct FilePlane {
    uploads: Arc<dyn UploadRegistry>,
    uploads_root: PathBuf,
    node_manager: Arc<NodeManager>,
    fleet_mode: bool,
    download_token_key: Vec<u8>,
    cache: Option<ResultCache>,
}

impl FilePlane {
    pub fn new(
        uploads: Arc<dyn UploadRegistry>,
        uploads_root: impl Into<PathBuf>,
        node_manager: Arc<NodeManager>,
        fleet_mode: bool,
        download_token_key: Vec<u8>,
        file_cache_ttl: Option<Duration>,
    ) -> Self {
        Self {
            uploads,
            uploads_root: uploads_root.into(),
            node_manager,
            fleet_mode,
            download_token_key,
            cache: file_cache_ttl.map(ResultCache::new),
        }
    }

    /// §4.I(a): write the bytes under a date-partitioned path and record a
    /// registry row. The caller has already validated size against the
    /// configured upload limit.
    pub async fn ingest_upload(
        &self,
        owner: ClientId,
        original_name: &str,
        bytes: &[u8],
        mime_type: String,
        dims: Option<(u32, u32)>,
    ) -> Result<UploadRecord, FilePlaneError> {
        let now = Utc::now();
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let file_id = FileId::new();
        let relative_path = format!(
            "{}/{}/{}/{}_{}.{}",
            now.format("%Y"),
            now.format("%m"),
            now.format("%d"),
            now.format("%H%M%S"),
            &file_id.as_str()[..8],
            ext
        );

        let absolute = self.resolve_within_root(&relative_path)?;
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FilePlaneError::Db(DbError::Corrupt(e.to_string())))?;
        }
        tokio::fs::write(&absolute, bytes)
            .await
            .map_err(|e| FilePlaneError::Db(DbError::Corrupt(e.to_string())))?;

        let record = UploadRecord {
            file_id,
            owner,
            original_name: original_name.to_string(),
            relative_path,
            size: bytes.len() as u64,
            mime_type,
            width: dims.map(|(w, _)| w),
            height: dims.map(|(_, h)| h),
            created_at: now,
        };
        self.uploads.insert(&record).await?;
        Ok(record)
    }

    /// §4.I(b) uploads egress: serves an uploaded input's bytes by its
    /// registry-relative path, for a node presenting its scoped token.
    pub async fn read_upload_for_node(
        &self,
        relative_path: &str,
        token: &str,
    ) -> Result<Vec<u8>, FilePlaneError> {
        let record = self.uploads.get_by_relative_path(relative_path).await?;
        DownloadToken::from(token.to_string()).verify(&self.download_token_key, record.file_id.as_str())?;
        let absolute = self.resolve_within_root(relative_path)?;
        tokio::fs::read(&absolute).await.map_err(|_| FilePlaneError::NotFound)
    }

    /// §4.I(b) uploads egress for the owning client (no token needed; the
    /// HTTP layer has already authenticated the caller as the owner).
    pub async fn read_upload_for_owner(&self, file_id: &FileId) -> Result<(UploadRecord, Vec<u8>), FilePlaneError> {
        let record = self.uploads.get(file_id).await?;
        let absolute = self.resolve_within_root(&record.relative_path)?;
        let bytes = tokio::fs::read(&absolute).await.map_err(|_| FilePlaneError::NotFound)?;
        Ok((record, bytes))
    }

    /// §4.I(b) results egress: local-first, then (fleet mode) proxy through
    /// the owning node, falling back to any other online node on failure.
    pub async fn read_result(&self, locator: &ArtifactLocator) -> Result<(Vec<u8>, Option<String>), FilePlaneError> {
        match locator {
            ArtifactLocator::Local { path } => {
                let bytes = tokio::fs::read(path).await.map_err(|_| FilePlaneError::NotFound)?;
                Ok((bytes, None))
            }
            ArtifactLocator::Remote { node_id, relative_path } => {
                self.read_remote_result(node_id.as_str(), relative_path).await
            }
        }
    }

    async fn read_remote_result(
        &self,
        node_id: &str,
        relative_path: &str,
    ) -> Result<(Vec<u8>, Option<String>), FilePlaneError> {
        let cache_key = (node_id.to_string(), relative_path.to_string());
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&cache_key).await {
                return Ok(hit);
            }
        }

        let (subfolder, filename) = split_relative_path(relative_path);

        let mut candidates = Vec::new();
        if let Some(node) = self.node_manager.get_node(node_id).await {
            if node.status == NodeStatus::Online {
                candidates.push(node);
            }
        }
        for node in self.node_manager.all_nodes().await {
            if node.status == NodeStatus::Online && node.id.as_str() != node_id {
                candidates.push(node);
            }
        }

        for node in candidates {
            let client = NodeClient::new(node.base_url());
            match client.view(&filename, &subfolder).await {
                Ok((bytes, content_type)) => {
                    if let Some(cache) = &self.cache {
                        cache.put(cache_key.clone(), bytes.clone(), content_type.clone()).await;
                    }
                    return Ok((bytes, content_type));
                }
                Err(e) => {
                    warn!(node_id = %node.id, relative_path, error = %e, "result proxy attempt failed, trying next node");
                }
            }
        }

        Err(FilePlaneError::AllNodesFailed)
    }

    /// Rejects `..` components and normalises either separator to the
    /// platform's, refusing to resolve outside `uploads_root` (§4.I
    /// "path traversal is rejected... paths may use either separator").
    fn resolve_within_root(&self, relative_path: &str) -> Result<PathBuf, FilePlaneError> {
        let normalized = relative_path.replace('\\', "/");
        let mut resolved = self.uploads_root.clone();
        for component in normalized.split('/') {
            if component.is_empty() || component == "." {
                continue;
            }
            if component == ".." {
                return Err(FilePlaneError::PathTraversal);
            }
            resolved.push(component);
        }
        Ok(resolved)
    }
}

/// Splits a harvested relative path into `(subfolder, filename)`, the shape
/// `GET /view` expects. The last separator wins; no subfolder means root.
fn split_relative_path(relative_path: &str) -> (String, String) {
    let normalized = relative_path.replace('\\', "/");
    match normalized.rsplit_once('/') {
        Some((subfolder, filename)) => (subfolder.to_string(), filename.to_string()),
        None => (String::new(), normalized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_traversal() {
        let plane_root = PathBuf::from("/tmp/uploads-root");
        let fake = FakePlane { root: plane_root };
        assert!(matches!(fake.resolve("../../etc/passwd"), Err(FilePlaneError::PathTraversal)));
    }

    #[test]
    fn normalises_backslashes_to_forward_slashes() {
        let plane_root = PathBuf::from("/tmp/uploads-root");
        let fake = FakePlane { root: plane_root.clone() };
        let resolved = fake.resolve(r"2025\07\26\file.png").unwrap();
        assert_eq!(resolved, plane_root.join("2025").join("07").join("26").join("file.png"));
    }

    #[test]
    fn splits_subfolder_and_filename() {
        assert_eq!(split_relative_path("video/clip_001.png"), ("video".to_string(), "clip_001.png".to_string()));
        assert_eq!(split_relative_path("clip_001.png"), (String::new(), "clip_001.png".to_string()));
        assert_eq!(split_relative_path(r"video\clip_001.png"), ("video".to_string(), "clip_001.png".to_string()));
    }

    /// Mirrors `FilePlane::resolve_within_root` without needing a full
    /// `FilePlane` (which requires a registry and node manager to build).
    struct FakePlane {
        root: PathBuf,
    }

    impl FakePlane {
        fn resolve(&self, relative_path: &str) -> Result<PathBuf, FilePlaneError> {
            let normalized = relative_path.replace('\\', "/");
            let mut resolved = self.root.clone();
            for component in normalized.split('/') {
                if component.is_empty() || component == "." {
                    continue;
                }
                if component == ".." {
                    return Err(FilePlaneError::PathTraversal);
                }
                resolved.push(component);
            }
            Ok(resolved)
        }
    }
}
