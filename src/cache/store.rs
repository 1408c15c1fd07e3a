//! Blob Store Module
//!
//! One get/put/delete contract over the three physical tiers: pool rows,
//! report rows, and files on disk.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cache::files::FileCache;
use crate::cache::key::{CacheKey, OwnerId, ReportId, Tier};
use crate::cache::tables::ChartTables;
use crate::cache::CachedBlob;
use crate::error::{ChartCacheError, Result};

// == Delete Scope ==
/// Whose blobs a bulk delete targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteScope {
    Owner(OwnerId),
    Report(ReportId),
}

// == Blob Store ==
#[derive(Debug, Clone)]
pub struct BlobStore {
    tables: Arc<RwLock<ChartTables>>,
    files: FileCache,
}

impl BlobStore {
    pub fn new(tables: Arc<RwLock<ChartTables>>, files: FileCache) -> Self {
        Self { tables, files }
    }

    pub fn files(&self) -> &FileCache {
        &self.files
    }

    // == Get ==
    /// Returns the stored blob for `key`, or `None` if nothing is stored.
    ///
    /// Table rows whose data cannot be decoded count as nothing stored.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CachedBlob>> {
        match key {
            CacheKey::Pool { owner, rank } => {
                let tables = self.tables.read().await;
                Ok(tables
                    .pool_row(*owner, *rank)
                    .and_then(|row| CachedBlob::decode(&row.image_data)))
            }
            CacheKey::Report {
                report_id,
                ordering,
            } => {
                let tables = self.tables.read().await;
                Ok(tables
                    .report_slot(report_id, *ordering)
                    .and_then(|slot| CachedBlob::decode(&slot.image_data)))
            }
            CacheKey::Volatile {
                owner,
                rank,
                did,
                window: None,
            } => {
                // The default preview's window lives in its meta file
                let Some(window) = self
                    .files
                    .read_meta(*owner, *rank, did)
                    .await?
                    .and_then(|meta| meta.window)
                else {
                    return Ok(None);
                };
                Ok(self
                    .read_file(key)
                    .await?
                    .map(|bytes| CachedBlob::new(window, bytes)))
            }
            CacheKey::Volatile {
                window: Some(window),
                ..
            }
            | CacheKey::Cached { window, .. } => Ok(self
                .read_file(key)
                .await?
                .map(|bytes| CachedBlob::new(window.clone(), bytes))),
        }
    }

    async fn read_file(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        match self.files.path_for(key) {
            Some(path) => self.files.read(&path).await,
            None => Ok(None),
        }
    }

    // == Put ==
    /// Stores `blob` for `key`.
    ///
    /// Table tiers store the encoded blob in the row, which must exist. File
    /// tiers write the raw image; the window is already part of the name.
    pub async fn put(&self, key: &CacheKey, blob: &CachedBlob) -> Result<()> {
        match key {
            CacheKey::Pool { owner, rank } => {
                self.tables
                    .write()
                    .await
                    .set_pool_image(*owner, *rank, blob.encode())
            }
            CacheKey::Report {
                report_id,
                ordering,
            } => self
                .tables
                .write()
                .await
                .set_report_image(report_id, *ordering, blob.encode()),
            CacheKey::Volatile { .. } | CacheKey::Cached { .. } => {
                let path = self.files.path_for(key).ok_or_else(|| {
                    ChartCacheError::Storage(format!("no file path for {}", key))
                })?;
                self.files.write_atomic(&path, &blob.bytes).await
            }
        }
    }

    // == Delete ==
    /// Drops the stored blob for `key`. Table rows are kept with empty data.
    pub async fn delete(&self, key: &CacheKey) -> Result<()> {
        match key {
            CacheKey::Pool { owner, rank } => {
                self.tables
                    .write()
                    .await
                    .set_pool_image(*owner, *rank, Vec::new())
            }
            CacheKey::Report {
                report_id,
                ordering,
            } => self
                .tables
                .write()
                .await
                .set_report_image(report_id, *ordering, Vec::new()),
            CacheKey::Volatile { .. } | CacheKey::Cached { .. } => {
                if let Some(path) = self.files.path_for(key) {
                    self.files.remove(&path).await?;
                }
                Ok(())
            }
        }
    }

    // == Delete All ==
    /// Drops every blob of `tier` within `scope`. Returns how many were dropped.
    pub async fn delete_all(&self, tier: Tier, scope: &DeleteScope) -> Result<usize> {
        match (tier, scope) {
            (Tier::ChartPool, DeleteScope::Owner(owner)) => {
                Ok(self.tables.write().await.clear_pool_images(*owner))
            }
            (Tier::Report, DeleteScope::Report(report_id)) => {
                Ok(self.tables.write().await.clear_report_images(report_id))
            }
            (Tier::Report, DeleteScope::Owner(owner)) => {
                Ok(self.tables.write().await.clear_owner_report_images(*owner))
            }
            (Tier::Volatile, DeleteScope::Owner(owner)) => {
                self.files.evict_owner_volatile(*owner).await
            }
            (Tier::Cached, DeleteScope::Report(report_id)) => self.files.evict_report(report_id).await,
            (Tier::Cached, DeleteScope::Owner(owner)) => self.files.evict_owner_cached(*owner).await,
            (tier, scope) => Err(ChartCacheError::InvalidRequest(format!(
                "{} blobs cannot be deleted by {:?}",
                tier, scope
            ))),
        }
    }
}
