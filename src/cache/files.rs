//! File Cache Module
//!
//! On-disk tier for volatile previews and date-overridden report thumbnails.
//! File names are derived from the cache key, so the window a file was
//! rendered for is part of its name.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::cache::key::{volatile_slot, CacheKey, OwnerId};
use crate::cache::ValidityWindow;
use crate::error::{ChartCacheError, Result};

const VOLATILE_PREFIX: &str = "chart_volatile_";
const CACHED_PREFIX: &str = "chart_cached_";
const TEMP_PREFIX: &str = ".chart_";

// == Volatile Meta ==
/// Companion record of a volatile preview: the chart spec it was rendered
/// from and the window it covered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatileMeta {
    pub spec: String,
    pub window: Option<ValidityWindow>,
}

impl VolatileMeta {
    fn to_file(&self) -> String {
        match &self.window {
            Some(w) => format!("{}\n{}_{}", self.spec, w.start, w.end),
            None => self.spec.clone(),
        }
    }

    fn from_file(contents: &str) -> Option<Self> {
        let mut lines = contents.lines();
        let spec = lines.next()?.trim_end().to_string();
        if spec.is_empty() {
            return None;
        }
        let window = lines
            .next()
            .and_then(|line| line.trim_end().split_once('_'))
            .map(|(start, end)| ValidityWindow::new(start, end));
        Some(Self { spec, window })
    }
}

// == File Cache ==
#[derive(Debug, Clone)]
pub struct FileCache {
    root: Arc<PathBuf>,
    temp_seq: Arc<AtomicU64>,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
            temp_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the cache directory if needed.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.root.as_path())
            .await
            .map_err(|e| storage_error("creating", &self.root, e))
    }

    // == Paths ==
    /// Path of the file holding the blob for `key`, if the key lives on disk.
    pub fn path_for(&self, key: &CacheKey) -> Option<PathBuf> {
        match key {
            CacheKey::Volatile {
                owner,
                rank,
                did,
                window: Some(window),
            } => Some(self.root.join(format!(
                "{}{}_{}_{}_{}.png",
                VOLATILE_PREFIX,
                owner,
                volatile_slot(*rank, did),
                window.start,
                window.end
            ))),
            CacheKey::Volatile {
                owner,
                rank,
                did,
                window: None,
            } => Some(self.volatile_base_path(*owner, *rank, did, "png")),
            CacheKey::Cached {
                report_id,
                ordering,
                window,
            } => Some(self.root.join(format!(
                "{}{}_{}_{}_{}.png",
                CACHED_PREFIX, report_id, ordering, window.start, window.end
            ))),
            CacheKey::Pool { .. } | CacheKey::Report { .. } => None,
        }
    }

    fn volatile_base_path(&self, owner: OwnerId, rank: u64, did: &str, extension: &str) -> PathBuf {
        self.root.join(format!(
            "{}{}_{}.{}",
            VOLATILE_PREFIX,
            owner,
            volatile_slot(rank, did),
            extension
        ))
    }

    // == Read / Write ==
    /// Reads a cache file; a missing file is `None`.
    pub async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("reading", path, e)),
        }
    }

    /// Writes `bytes` to `path` so that readers never see a partial file.
    ///
    /// The data goes to a hidden temp file in the same directory first and is
    /// then renamed over the target.
    pub async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| ChartCacheError::Storage(format!("{} has no parent", path.display())))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_error("creating", parent, e))?;

        let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("file");
        let tmp = parent.join(format!(
            "{}{}.tmp.{}.{}",
            TEMP_PREFIX,
            file_name,
            std::process::id(),
            self.temp_seq.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(storage_error("writing", &tmp, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(storage_error("renaming", path, e));
        }
        Ok(())
    }

    /// Removes a cache file; returns false if it did not exist.
    pub async fn remove(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_error("removing", path, e)),
        }
    }

    // == Volatile Meta ==
    pub async fn read_meta(&self, owner: OwnerId, rank: u64, did: &str) -> Result<Option<VolatileMeta>> {
        let path = self.volatile_base_path(owner, rank, did, "meta");
        Ok(self
            .read(&path)
            .await?
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .and_then(|contents| VolatileMeta::from_file(&contents)))
    }

    pub async fn write_meta(&self, owner: OwnerId, rank: u64, did: &str, meta: &VolatileMeta) -> Result<()> {
        let path = self.volatile_base_path(owner, rank, did, "meta");
        self.write_atomic(&path, meta.to_file().as_bytes()).await
    }

    // == Eviction ==
    /// Removes every file whose name satisfies `matches`. Returns the count.
    pub async fn evict_matching<F>(&self, matches: F) -> Result<usize>
    where
        F: Fn(&str) -> bool,
    {
        let mut dir = match tokio::fs::read_dir(self.root.as_path()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(storage_error("listing", &self.root, e)),
        };

        let mut removed = 0;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| storage_error("listing", &self.root, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if matches(name) && self.remove(&entry.path()).await? {
                debug!(file = name, "Evicted chart file");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Evicts every file keyed to `owner`: volatile previews and cached
    /// thumbnails of the owner's reports.
    pub async fn evict_owner(&self, owner: OwnerId) -> Result<usize> {
        let volatile = format!("{}{}_", VOLATILE_PREFIX, owner);
        let cached = format!("{}{}-", CACHED_PREFIX, owner);
        self.evict_matching(|name| name.starts_with(&volatile) || name.starts_with(&cached))
            .await
    }

    /// Evicts `owner`'s volatile previews along with their meta files.
    pub async fn evict_owner_volatile(&self, owner: OwnerId) -> Result<usize> {
        let volatile = format!("{}{}_", VOLATILE_PREFIX, owner);
        self.evict_matching(|name| name.starts_with(&volatile)).await
    }

    /// Evicts the cached thumbnails of all of `owner`'s reports.
    pub async fn evict_owner_cached(&self, owner: OwnerId) -> Result<usize> {
        let cached = format!("{}{}-", CACHED_PREFIX, owner);
        self.evict_matching(|name| name.starts_with(&cached)).await
    }

    /// Evicts the volatile previews (and their duplicates) of one pool rank.
    pub async fn evict_pool_rank(&self, owner: OwnerId, rank: u64) -> Result<usize> {
        let prefix = format!("{}{}_{}", VOLATILE_PREFIX, owner, rank);
        self.evict_matching(|name| followed_by_separator(name, &prefix))
            .await
    }

    /// Evicts the cached thumbnails of `report_id`.
    pub async fn evict_report(&self, report_id: &str) -> Result<usize> {
        let prefix = format!("{}{}_", CACHED_PREFIX, report_id);
        self.evict_matching(|name| name.starts_with(&prefix)).await
    }

    /// Evicts the cached thumbnails of one report slot.
    pub async fn evict_report_slot(&self, report_id: &str, ordering: u32) -> Result<usize> {
        let prefix = format!("{}{}_{}_", CACHED_PREFIX, report_id, ordering);
        self.evict_matching(|name| name.starts_with(&prefix)).await
    }

    // == Sweep ==
    /// Removes chart files (and abandoned temp files) last modified more than
    /// `ttl` ago. Returns the number of files removed.
    pub async fn sweep_older_than(&self, ttl: Duration) -> Result<usize> {
        let mut dir = match tokio::fs::read_dir(self.root.as_path()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(storage_error("listing", &self.root, e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| storage_error("listing", &self.root, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_cache_file(name) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(file = name, error = %e, "Skipping chart file without mtime");
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= ttl && self.remove(&entry.path()).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_cache_file(name: &str) -> bool {
    name.starts_with(VOLATILE_PREFIX) || name.starts_with(CACHED_PREFIX) || name.starts_with(TEMP_PREFIX)
}

/// True if `name` starts with `prefix` and the next character ends the rank
/// (so rank 1 does not match rank 12).
fn followed_by_separator(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| matches!(c, '-' | '_' | '.'))
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> ChartCacheError {
    ChartCacheError::Storage(format!("{} {}: {}", action, path.display(), e))
}
