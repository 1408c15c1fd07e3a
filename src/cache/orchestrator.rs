//! Cache Orchestrator
//!
//! `ChartCache` is the entry point for everything chart-image related:
//! serving a blob (rendering it when the stored one is stale), and managing
//! the pool and report tables the blobs hang off.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::files::{FileCache, VolatileMeta};
use super::key::{report_slot_lock, resolve_window, CacheKey, OwnerId};
use super::lock::{mutex_lock, KeyedLocks};
use super::staleness::{evaluate, Usability};
use super::stats::CacheStats;
use super::store::{BlobStore, DeleteScope};
use super::tables::ChartTables;
use super::{
    CachedBlob, NewPoolChart, NewReportChart, PoolChartSummary, Report, ReportChartSummary, Tier,
    ValidityWindow,
};
use crate::error::{ChartCacheError, Result};
use crate::render::RenderGateway;
use crate::timeframe::PeriodResolver;

// == Chart Cache ==
#[derive(Clone)]
pub struct ChartCache {
    tables: Arc<RwLock<ChartTables>>,
    store: BlobStore,
    gateway: Arc<RenderGateway>,
    periods: Arc<dyn PeriodResolver>,
    locks: Arc<KeyedLocks>,
    stats: Arc<Mutex<CacheStats>>,
}

impl ChartCache {
    pub fn new(files: FileCache, gateway: RenderGateway, periods: Arc<dyn PeriodResolver>) -> Self {
        let tables = Arc::new(RwLock::new(ChartTables::new()));
        Self {
            store: BlobStore::new(tables.clone(), files),
            tables,
            gateway: Arc::new(gateway),
            periods,
            locks: Arc::new(KeyedLocks::new()),
            stats: Arc::new(Mutex::new(CacheStats::new())),
        }
    }

    pub fn files(&self) -> &FileCache {
        self.store.files()
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    // == Fetch ==
    /// Returns the PNG for `key`, rendering and storing it if the stored
    /// blob is missing or stale.
    pub async fn fetch_blob(&self, key: &CacheKey) -> Result<Vec<u8>> {
        if let CacheKey::Volatile {
            owner,
            rank,
            did,
            window: None,
        } = key
        {
            return self.fetch_volatile_default(*owner, *rank, did).await;
        }

        let desired = self.desired_window(key).await?;
        self.serve(key, &desired).await
    }

    /// Serves `key` from the store when the stored blob matches `desired`.
    async fn serve(&self, key: &CacheKey, desired: &ValidityWindow) -> Result<Vec<u8>> {
        let current = self.store.get(key).await?;
        match (evaluate(current.as_ref(), desired), current) {
            (Usability::Fresh, Some(blob)) => {
                debug!(key = %key, "Chart cache hit");
                mutex_lock(&self.stats, "stats.hit").record_hit();
                Ok(blob.bytes)
            }
            (reason, _) => {
                if reason == Usability::CorruptHeader {
                    warn!(key = %key, "Stored chart is not a PNG, regenerating");
                } else {
                    debug!(key = %key, reason = reason.as_str(), window = %desired, "Chart cache miss");
                }
                mutex_lock(&self.stats, "stats.miss").record_miss(reason);
                self.generate_blob(key, desired).await
            }
        }
    }

    // == Generate ==
    /// Renders the chart behind `key` for `desired` and stores the result.
    ///
    /// Runs under the key's lock. A blob another caller stored for the same
    /// window while this one waited is returned without rendering again.
    pub async fn generate_blob(&self, key: &CacheKey, desired: &ValidityWindow) -> Result<Vec<u8>> {
        let _guard = self.locks.acquire(&key.lock_key()).await;

        if let Some(blob) = self.store.get(key).await? {
            if evaluate(Some(&blob), desired) == Usability::Fresh {
                debug!(key = %key, "Reusing chart rendered while waiting");
                return Ok(blob.bytes);
            }
        }

        let spec = self.locate_spec(key).await?;
        let bytes = self.render(key, &spec, desired).await?;
        self.store
            .put(key, &CachedBlob::new(desired.clone(), bytes.clone()))
            .await?;

        info!(key = %key, window = %desired, size = bytes.len(), "Rendered chart");
        Ok(bytes)
    }

    async fn render(&self, key: &CacheKey, spec: &str, window: &ValidityWindow) -> Result<Vec<u8>> {
        let result = self.gateway.render(spec, window).await;
        mutex_lock(&self.stats, "stats.render").record_render(result.is_ok());
        if let Err(e) = &result {
            warn!(key = %key, error = %e, "Chart render failed");
        }
        result
    }

    /// Default preview of a pool chart.
    ///
    /// The base file is reused while the window recorded in its meta file
    /// matches the pool chart's current window. Otherwise the chart is served
    /// through the pool and the preview files are rewritten.
    async fn fetch_volatile_default(&self, owner: OwnerId, rank: u64, did: &str) -> Result<Vec<u8>> {
        let pool_key = CacheKey::Pool { owner, rank };
        let key = CacheKey::Volatile {
            owner,
            rank,
            did: did.to_string(),
            window: None,
        };
        let desired = self.desired_window(&pool_key).await?;

        if let Some(blob) = self.store.get(&key).await? {
            let verdict = evaluate(Some(&blob), &desired);
            if verdict == Usability::Fresh {
                debug!(key = %key, "Chart cache hit");
                mutex_lock(&self.stats, "stats.hit").record_hit();
                return Ok(blob.bytes);
            }
            mutex_lock(&self.stats, "stats.miss").record_miss(verdict);
        } else {
            mutex_lock(&self.stats, "stats.miss").record_miss(Usability::Missing);
        }

        let _guard = self.locks.acquire(&key.lock_key()).await;
        if let Some(blob) = self.store.get(&key).await? {
            if evaluate(Some(&blob), &desired) == Usability::Fresh {
                return Ok(blob.bytes);
            }
        }

        let spec = self.locate_spec(&key).await?;
        let bytes = if did.is_empty() {
            match self.store.get(&pool_key).await? {
                Some(blob) if evaluate(Some(&blob), &desired) == Usability::Fresh => blob.bytes,
                _ => self.generate_blob(&pool_key, &desired).await?,
            }
        } else {
            self.render(&key, &spec, &desired).await?
        };

        let blob = CachedBlob::new(desired.clone(), bytes);
        let windowed = CacheKey::Volatile {
            owner,
            rank,
            did: did.to_string(),
            window: Some(desired.clone()),
        };
        self.store.put(&windowed, &blob).await?;
        self.store.put(&key, &blob).await?;
        // Meta last: the base file is only trusted once its window is recorded
        self.files()
            .write_meta(
                owner,
                rank,
                did,
                &VolatileMeta {
                    spec,
                    window: Some(desired),
                },
            )
            .await?;

        Ok(blob.bytes)
    }

    // == Key Lookups ==
    /// Window the blob behind `key` must cover right now.
    async fn desired_window(&self, key: &CacheKey) -> Result<ValidityWindow> {
        let timeframe = {
            let tables = self.tables.read().await;
            match key {
                CacheKey::Pool { owner, rank } => tables
                    .pool_row(*owner, *rank)
                    .map(|row| row.entry.timeframe.clone()),
                CacheKey::Report {
                    report_id,
                    ordering,
                } => tables
                    .report_slot(report_id, *ordering)
                    .map(|slot| slot.entry.timeframe.clone()),
                CacheKey::Volatile {
                    window: Some(window),
                    ..
                }
                | CacheKey::Cached { window, .. } => return Ok(window.clone()),
                CacheKey::Volatile {
                    owner,
                    rank,
                    window: None,
                    ..
                } => tables
                    .pool_row(*owner, *rank)
                    .map(|row| row.entry.timeframe.clone()),
            }
        }
        .ok_or_else(|| missing_entry(key))?;

        resolve_window(&timeframe, self.periods.as_ref(), Utc::now())
    }

    /// Chart spec to render for `key`.
    ///
    /// Volatile previews prefer the spec recorded in their meta file and fall
    /// back to the pool row.
    async fn locate_spec(&self, key: &CacheKey) -> Result<String> {
        if let CacheKey::Volatile { owner, rank, did, .. } = key {
            if let Some(meta) = self.files().read_meta(*owner, *rank, did).await? {
                return Ok(meta.spec);
            }
        }

        let tables = self.tables.read().await;
        let spec = match key {
            CacheKey::Pool { owner, rank } | CacheKey::Volatile { owner, rank, .. } => tables
                .pool_row(*owner, *rank)
                .map(|row| row.entry.spec.clone()),
            CacheKey::Report {
                report_id,
                ordering,
            }
            | CacheKey::Cached {
                report_id,
                ordering,
                ..
            } => tables
                .report_slot(report_id, *ordering)
                .map(|slot| slot.entry.spec.clone()),
        };
        spec.ok_or_else(|| missing_entry(key))
    }

    // == Pool ==
    /// Queues a chart in `owner`'s pool and returns its insertion rank.
    pub async fn add_to_pool(&self, owner: OwnerId, chart: NewPoolChart) -> Result<u64> {
        let rank = self.tables.write().await.insert_pool_chart(owner, chart)?;
        info!(owner, rank, "Chart added to pool");
        Ok(rank)
    }

    /// Removes the pool chart with `spec` and its preview files.
    pub async fn remove_from_pool(&self, owner: OwnerId, spec: &str) -> Result<u64> {
        let rank = self.tables.write().await.remove_pool_chart(owner, spec)?;
        let evicted = self.files().evict_pool_rank(owner, rank).await?;
        mutex_lock(&self.stats, "stats.evict").record_evictions(evicted);
        info!(owner, rank, evicted, "Chart removed from pool");
        Ok(rank)
    }

    /// Forgets the rendered images of `owner`'s pool; the charts stay queued.
    pub async fn clear_pool(&self, owner: OwnerId) -> Result<usize> {
        let cleared = self
            .store
            .delete_all(Tier::ChartPool, &DeleteScope::Owner(owner))
            .await?;
        info!(owner, cleared, "Pool images cleared");
        Ok(cleared)
    }

    /// Removes every chart from `owner`'s pool along with its preview files.
    pub async fn empty_queue(&self, owner: OwnerId) -> Result<usize> {
        let removed = self.tables.write().await.remove_pool(owner);
        let evicted = self
            .store
            .delete_all(Tier::Volatile, &DeleteScope::Owner(owner))
            .await?;
        mutex_lock(&self.stats, "stats.evict").record_evictions(evicted);
        info!(owner, removed, evicted, "Pool emptied");
        Ok(removed)
    }

    /// Pool charts of `owner` in insertion order.
    pub async fn fetch_chart_pool(&self, owner: OwnerId) -> Vec<PoolChartSummary> {
        self.tables
            .read()
            .await
            .pool_rows(owner)
            .map(|row| row.summary())
            .collect()
    }

    // == Reports ==
    pub async fn create_report(&self, owner: OwnerId, name: String, charts_per_page: u32) -> Report {
        let report = self
            .tables
            .write()
            .await
            .create_report(owner, name, charts_per_page);
        info!(owner, report_id = %report.report_id, "Report created");
        report
    }

    /// Places a chart at `chart.ordering`, replacing what was there.
    ///
    /// Thumbnails cached on disk for that slot are dropped with the old chart.
    pub async fn save_chart_to_report(&self, report_id: &str, chart: NewReportChart) -> Result<()> {
        let ordering = chart.ordering;
        // Renders of the old chart finish before the slot changes
        let _guard = self
            .locks
            .acquire(&report_slot_lock(report_id, ordering))
            .await;
        self.tables
            .write()
            .await
            .upsert_report_chart(report_id, chart)?;
        let evicted = self.files().evict_report_slot(report_id, ordering).await?;
        mutex_lock(&self.stats, "stats.evict").record_evictions(evicted);
        debug!(report_id, ordering, "Chart saved to report");
        Ok(())
    }

    /// Charts of a report in display order.
    pub async fn fetch_report_charts(&self, report_id: &str) -> Result<Vec<ReportChartSummary>> {
        let tables = self.tables.read().await;
        if tables.report(report_id).is_none() {
            return Err(ChartCacheError::NotFound(format!(
                "report {} does not exist",
                report_id
            )));
        }
        Ok(tables
            .report_slots(report_id)
            .map(|slot| slot.summary())
            .collect())
    }

    /// Deletes every chart of a report and its cached thumbnails.
    pub async fn remove_report_charts(&self, report_id: &str) -> Result<usize> {
        let _guards = self.lock_report_slots(report_id).await;
        let removed = {
            let mut tables = self.tables.write().await;
            if tables.report(report_id).is_none() {
                return Err(ChartCacheError::MissingEntry(format!(
                    "report {} does not exist",
                    report_id
                )));
            }
            tables.remove_report_slots(report_id)
        };
        self.evict_report_files(report_id).await?;
        info!(report_id, removed, "Report charts removed");
        Ok(removed)
    }

    /// Deletes a report, its charts, and its cached thumbnails.
    pub async fn remove_report(&self, report_id: &str) -> Result<usize> {
        let _guards = self.lock_report_slots(report_id).await;
        let removed = self.tables.write().await.remove_report(report_id)?;
        self.evict_report_files(report_id).await?;
        info!(report_id, removed, "Report removed");
        Ok(removed)
    }

    /// Holds the lock of every current slot of `report_id`, in ordering order.
    async fn lock_report_slots(&self, report_id: &str) -> Vec<OwnedMutexGuard<()>> {
        let orderings: Vec<u32> = self
            .tables
            .read()
            .await
            .report_slots(report_id)
            .filter_map(|slot| u32::try_from(slot.entry.slot_id).ok())
            .collect();

        let mut guards = Vec::with_capacity(orderings.len());
        for ordering in orderings {
            guards.push(self.locks.acquire(&report_slot_lock(report_id, ordering)).await);
        }
        guards
    }

    async fn evict_report_files(&self, report_id: &str) -> Result<()> {
        let evicted = self
            .store
            .delete_all(Tier::Cached, &DeleteScope::Report(report_id.to_string()))
            .await?;
        mutex_lock(&self.stats, "stats.evict").record_evictions(evicted);
        Ok(())
    }

    /// Forgets the rendered images of all of `owner`'s report charts.
    pub async fn empty_report_cache(&self, owner: OwnerId) -> Result<usize> {
        let cleared = self
            .store
            .delete_all(Tier::Report, &DeleteScope::Owner(owner))
            .await?;
        info!(owner, cleared, "Report images cleared");
        Ok(cleared)
    }

    /// Removes every cache file keyed to `owner`.
    pub async fn flush_image_cache(&self, owner: OwnerId) -> Result<usize> {
        let evicted = self.files().evict_owner(owner).await?;
        mutex_lock(&self.stats, "stats.evict").record_evictions(evicted);
        info!(owner, evicted, "Image cache flushed");
        Ok(evicted)
    }

    /// Records files removed outside of the cache's own operations.
    pub fn record_evictions(&self, count: usize) {
        mutex_lock(&self.stats, "stats.evict").record_evictions(count);
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        let (pool_entries, report_slots) = {
            let tables = self.tables.read().await;
            (tables.pool_len(), tables.slot_len())
        };
        let mut stats = mutex_lock(&self.stats, "stats.read").clone();
        stats.set_table_sizes(pool_entries, report_slots);
        stats
    }
}

fn missing_entry(key: &CacheKey) -> ChartCacheError {
    ChartCacheError::NotFound(format!("Unable to target chart entry ({})", key))
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PNG_SIGNATURE;
    use crate::render::{ChartRenderer, ParamMap, RenderSettings, RendererKind};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    const NAMED: &str =
        "controller_module=metric_explorer&operation=get_data&timeframe_label=Previous+month&title=cpu";
    const FIXED: &str = "controller_module=metric_explorer&operation=get_data\
        &timeframe_label=User+Defined&start_date=2015-05-01&end_date=2015-05-31&title=mem";

    /// Answers with a PNG embedding the requested start date and `tag`.
    #[derive(Default)]
    struct StubRenderer {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
    }

    #[async_trait]
    impl ChartRenderer for StubRenderer {
        async fn render(&self, _kind: RendererKind, params: &ParamMap) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChartCacheError::Render("backend down".into()));
            }
            let mut bytes = PNG_SIGNATURE.to_vec();
            bytes.extend_from_slice(params["start_date"].as_bytes());
            if let Some(tag) = params.get("tag") {
                bytes.extend_from_slice(tag.as_bytes());
            }
            Ok(bytes)
        }
    }

    /// Resolves every label to one adjustable window.
    struct StubPeriods(Mutex<ValidityWindow>);

    impl StubPeriods {
        fn set(&self, start: &str, end: &str) {
            *self.0.lock().unwrap() = ValidityWindow::new(start, end);
        }
    }

    impl PeriodResolver for StubPeriods {
        fn resolve(&self, _label: &str, _now: DateTime<Utc>) -> Result<ValidityWindow> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    struct Harness {
        cache: ChartCache,
        renderer: Arc<StubRenderer>,
        periods: Arc<StubPeriods>,
        _dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_renderer(StubRenderer::default())
        }

        fn with_renderer(renderer: StubRenderer) -> Self {
            let dir = TempDir::new().unwrap();
            let renderer = Arc::new(renderer);
            let periods = Arc::new(StubPeriods(Mutex::new(ValidityWindow::new(
                "2024-01-01",
                "2024-01-31",
            ))));
            let gateway = RenderGateway::new(RenderSettings::default())
                .with_default_backend(renderer.clone());
            let cache = ChartCache::new(FileCache::new(dir.path()), gateway, periods.clone());
            Self {
                cache,
                renderer,
                periods,
                _dir: dir,
            }
        }

        fn calls(&self) -> usize {
            self.renderer.calls.load(Ordering::SeqCst)
        }

        async fn pool_chart(&self, owner: OwnerId, spec: &str) -> u64 {
            self.cache
                .add_to_pool(
                    owner,
                    NewPoolChart {
                        spec: spec.into(),
                        ..NewPoolChart::default()
                    },
                )
                .await
                .unwrap()
        }

        async fn report_with_chart(&self, owner: OwnerId, spec: &str) -> String {
            let report = self.cache.create_report(owner, "weekly".into(), 1).await;
            self.cache
                .save_chart_to_report(
                    &report.report_id,
                    NewReportChart {
                        ordering: 0,
                        spec: spec.into(),
                        timeframe_type: "Previous month".into(),
                        ..NewReportChart::default()
                    },
                )
                .await
                .unwrap();
            report.report_id
        }
    }

    fn png_for(start: &str) -> Vec<u8> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(start.as_bytes());
        bytes
    }

    #[tokio::test]
    async fn test_second_fetch_is_a_hit() {
        let h = Harness::new();
        let rank = h.pool_chart(1, NAMED).await;
        let key = CacheKey::Pool { owner: 1, rank };

        let first = h.cache.fetch_blob(&key).await.unwrap();
        let second = h.cache.fetch_blob(&key).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.calls(), 1);
        let stats = h.cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_window_change_rerenders_once() {
        let h = Harness::new();
        let rank = h.pool_chart(1, NAMED).await;
        let key = CacheKey::Pool { owner: 1, rank };
        h.cache.fetch_blob(&key).await.unwrap();

        h.periods.set("2024-02-01", "2024-02-29");
        let bytes = h.cache.fetch_blob(&key).await.unwrap();
        assert_eq!(bytes, png_for("2024-02-01"));
        h.cache.fetch_blob(&key).await.unwrap();

        assert_eq!(h.calls(), 2);
        let stored = h.cache.store().get(&key).await.unwrap().unwrap();
        assert_eq!(stored.window, ValidityWindow::new("2024-02-01", "2024-02-29"));
        assert_eq!(h.cache.stats().await.stale_windows, 1);
    }

    #[tokio::test]
    async fn test_user_defined_window_is_literal() {
        let h = Harness::new();
        let rank = h.pool_chart(1, FIXED).await;
        let bytes = h
            .cache
            .fetch_blob(&CacheKey::Pool { owner: 1, rank })
            .await
            .unwrap();
        assert_eq!(bytes, png_for("2015-05-01"));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_regenerated() {
        let h = Harness::new();
        let rank = h.pool_chart(1, NAMED).await;
        let key = CacheKey::Pool { owner: 1, rank };
        h.cache
            .store()
            .put(
                &key,
                &CachedBlob::new(ValidityWindow::new("2024-01-01", "2024-01-31"), b"GIF89a".to_vec()),
            )
            .await
            .unwrap();

        let bytes = h.cache.fetch_blob(&key).await.unwrap();
        assert_eq!(bytes, png_for("2024-01-01"));
        assert_eq!(h.calls(), 1);
        assert_eq!(h.cache.stats().await.corrupt_blobs, 1);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_render_once() {
        let h = Harness::with_renderer(StubRenderer {
            delay: Duration::from_millis(50),
            ..StubRenderer::default()
        });
        let rank = h.pool_chart(1, NAMED).await;
        let key = CacheKey::Pool { owner: 1, rank };

        let (a, b) = tokio::join!(h.cache.fetch_blob(&key), h.cache.fetch_blob(&key));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(h.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_entry_is_not_found() {
        let h = Harness::new();
        let result = h.cache.fetch_blob(&CacheKey::Pool { owner: 1, rank: 7 }).await;
        assert!(matches!(result, Err(ChartCacheError::NotFound(_))));

        let result = h
            .cache
            .fetch_blob(&CacheKey::Cached {
                report_id: "1-9".into(),
                ordering: 0,
                window: ValidityWindow::new("2024-01-01", "2024-01-31"),
            })
            .await;
        assert!(matches!(result, Err(ChartCacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_render_failure_is_surfaced() {
        let h = Harness::new();
        h.renderer.fail.store(true, Ordering::SeqCst);
        let rank = h.pool_chart(1, NAMED).await;
        let key = CacheKey::Pool { owner: 1, rank };

        let result = h.cache.fetch_blob(&key).await;
        assert!(matches!(result, Err(ChartCacheError::Render(_))));
        assert!(h.cache.store().get(&key).await.unwrap().is_none());
        assert_eq!(h.cache.stats().await.render_failures, 1);
    }

    #[tokio::test]
    async fn test_pool_rejects_equivalent_spec() {
        let h = Harness::new();
        let chart = |spec: &str| NewPoolChart {
            spec: spec.into(),
            title: "query 1".into(),
            ..NewPoolChart::default()
        };
        h.cache.add_to_pool(1, chart("a=1&title=query 1")).await.unwrap();

        let dup = h.cache.add_to_pool(1, chart("a=1&title=query+1")).await;
        assert!(matches!(dup, Err(ChartCacheError::DuplicateEntry(_))));
        // other owners are independent
        assert!(h.cache.add_to_pool(2, chart("a=1&title=query 1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_ranks_are_never_reused() {
        let h = Harness::new();
        assert_eq!(h.pool_chart(1, "a=1").await, 0);
        assert_eq!(h.pool_chart(1, "a=2").await, 1);
        assert_eq!(h.pool_chart(1, "a=3").await, 2);

        assert_eq!(h.cache.remove_from_pool(1, "a=2").await.unwrap(), 1);
        assert_eq!(h.pool_chart(1, "a=4").await, 3);

        let ranks: Vec<u64> = h
            .cache
            .fetch_chart_pool(1)
            .await
            .iter()
            .map(|c| c.insertion_rank)
            .collect();
        assert_eq!(ranks, vec![0, 2, 3]);

        let missing = h.cache.remove_from_pool(1, "a=2").await;
        assert!(matches!(missing, Err(ChartCacheError::MissingEntry(_))));
    }

    #[tokio::test]
    async fn test_clear_pool_keeps_rows() {
        let h = Harness::new();
        let rank = h.pool_chart(1, NAMED).await;
        let key = CacheKey::Pool { owner: 1, rank };
        h.cache.fetch_blob(&key).await.unwrap();

        assert_eq!(h.cache.clear_pool(1).await.unwrap(), 1);
        assert_eq!(h.cache.fetch_chart_pool(1).await.len(), 1);
        h.cache.fetch_blob(&key).await.unwrap();
        assert_eq!(h.calls(), 2);
    }

    #[tokio::test]
    async fn test_report_seeded_from_pool() {
        let h = Harness::new();
        let rank = h.pool_chart(1, NAMED).await;
        h.cache
            .fetch_blob(&CacheKey::Pool { owner: 1, rank })
            .await
            .unwrap();

        let report_id = h.report_with_chart(1, NAMED).await;
        h.cache
            .fetch_blob(&CacheKey::Report {
                report_id,
                ordering: 0,
            })
            .await
            .unwrap();
        assert_eq!(h.calls(), 1);
    }

    #[tokio::test]
    async fn test_remove_report_cascades() {
        let h = Harness::new();
        let gone = h.report_with_chart(1, NAMED).await;
        let kept = h.report_with_chart(1, NAMED).await;
        let window = ValidityWindow::new("2023-01-01", "2023-01-31");
        let cached = |report_id: &str| CacheKey::Cached {
            report_id: report_id.to_string(),
            ordering: 0,
            window: window.clone(),
        };
        let row = |report_id: &str| CacheKey::Report {
            report_id: report_id.to_string(),
            ordering: 0,
        };
        for id in [&gone, &kept] {
            h.cache.fetch_blob(&row(id)).await.unwrap();
            h.cache.fetch_blob(&cached(id)).await.unwrap();
        }
        assert_eq!(h.calls(), 4);

        assert_eq!(h.cache.remove_report(&gone).await.unwrap(), 1);

        assert!(matches!(
            h.cache.fetch_report_charts(&gone).await,
            Err(ChartCacheError::NotFound(_))
        ));
        assert!(h.cache.store().get(&cached(&gone)).await.unwrap().is_none());
        h.cache.fetch_blob(&row(&kept)).await.unwrap();
        h.cache.fetch_blob(&cached(&kept)).await.unwrap();
        assert_eq!(h.calls(), 4);
    }

    #[tokio::test]
    async fn test_remove_report_charts_keeps_report() {
        let h = Harness::new();
        let report_id = h.report_with_chart(1, NAMED).await;

        assert_eq!(h.cache.remove_report_charts(&report_id).await.unwrap(), 1);
        assert!(h.cache.fetch_report_charts(&report_id).await.unwrap().is_empty());
        assert!(matches!(
            h.cache.remove_report_charts("1-99").await,
            Err(ChartCacheError::MissingEntry(_))
        ));
    }

    #[tokio::test]
    async fn test_cached_thumbnail_only_writes_file() {
        let h = Harness::new();
        let report_id = h.report_with_chart(1, NAMED).await;
        let window = ValidityWindow::new("2020-01-01", "2020-12-31");
        let key = CacheKey::Cached {
            report_id: report_id.clone(),
            ordering: 0,
            window,
        };

        assert_eq!(h.cache.fetch_blob(&key).await.unwrap(), png_for("2020-01-01"));
        h.cache.fetch_blob(&key).await.unwrap();
        assert_eq!(h.calls(), 1);

        let row = CacheKey::Report {
            report_id,
            ordering: 0,
        };
        assert!(h.cache.store().get(&row).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_volatile_window_uses_pool_spec_without_writing_row() {
        let h = Harness::new();
        let rank = h.pool_chart(1, NAMED).await;
        let key = CacheKey::Volatile {
            owner: 1,
            rank,
            did: String::new(),
            window: Some(ValidityWindow::new("2019-01-01", "2019-12-31")),
        };

        assert_eq!(h.cache.fetch_blob(&key).await.unwrap(), png_for("2019-01-01"));
        h.cache.fetch_blob(&key).await.unwrap();
        assert_eq!(h.calls(), 1);
        assert!(h
            .cache
            .store()
            .get(&CacheKey::Pool { owner: 1, rank })
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_volatile_default_follows_pool_window() {
        let h = Harness::new();
        let rank = h.pool_chart(1, NAMED).await;
        let key = CacheKey::Volatile {
            owner: 1,
            rank,
            did: String::new(),
            window: None,
        };

        h.cache.fetch_blob(&key).await.unwrap();
        h.cache.fetch_blob(&key).await.unwrap();
        assert_eq!(h.calls(), 1);

        // the pool row was refreshed on the way
        h.cache
            .fetch_blob(&CacheKey::Pool { owner: 1, rank })
            .await
            .unwrap();
        assert_eq!(h.calls(), 1);

        let meta = h.cache.files().read_meta(1, rank, "").await.unwrap().unwrap();
        assert_eq!(meta.spec, NAMED);
        assert_eq!(meta.window, Some(ValidityWindow::new("2024-01-01", "2024-01-31")));

        h.periods.set("2024-02-01", "2024-02-29");
        assert_eq!(h.cache.fetch_blob(&key).await.unwrap(), png_for("2024-02-01"));
        assert_eq!(h.calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_queue_drops_rows_and_previews() {
        let h = Harness::new();
        let rank = h.pool_chart(1, NAMED).await;
        let preview = CacheKey::Volatile {
            owner: 1,
            rank,
            did: String::new(),
            window: Some(ValidityWindow::new("2019-01-01", "2019-12-31")),
        };
        h.cache.fetch_blob(&preview).await.unwrap();

        assert_eq!(h.cache.empty_queue(1).await.unwrap(), 1);
        assert!(h.cache.fetch_chart_pool(1).await.is_empty());
        assert!(h.cache.store().get(&preview).await.unwrap().is_none());
        // ranks keep counting after the pool is emptied
        assert_eq!(h.pool_chart(1, NAMED).await, 1);
    }

    #[tokio::test]
    async fn test_flush_and_empty_report_cache() {
        let h = Harness::new();
        let report_id = h.report_with_chart(1, NAMED).await;
        let row = CacheKey::Report {
            report_id: report_id.clone(),
            ordering: 0,
        };
        let cached = CacheKey::Cached {
            report_id,
            ordering: 0,
            window: ValidityWindow::new("2020-01-01", "2020-12-31"),
        };
        h.cache.fetch_blob(&row).await.unwrap();
        h.cache.fetch_blob(&cached).await.unwrap();

        assert_eq!(h.cache.flush_image_cache(1).await.unwrap(), 1);
        assert_eq!(h.cache.empty_report_cache(1).await.unwrap(), 1);
        assert!(h.cache.store().get(&row).await.unwrap().is_none());
        assert!(h.cache.store().get(&cached).await.unwrap().is_none());
    }

    fn slow_harness() -> Harness {
        Harness::with_renderer(StubRenderer {
            delay: Duration::from_millis(50),
            ..StubRenderer::default()
        })
    }

    fn replacement(spec: String) -> NewReportChart {
        NewReportChart {
            ordering: 0,
            spec,
            timeframe_type: "Previous month".into(),
            ..NewReportChart::default()
        }
    }

    #[tokio::test]
    async fn test_replacing_slot_waits_for_inflight_render() {
        let h = slow_harness();
        let report_id = h.report_with_chart(1, &format!("{}&tag=old", NAMED)).await;
        let key = CacheKey::Report {
            report_id: report_id.clone(),
            ordering: 0,
        };

        let inflight = {
            let cache = h.cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.fetch_blob(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.cache
            .save_chart_to_report(&report_id, replacement(format!("{}&tag=new", NAMED)))
            .await
            .unwrap();
        assert!(inflight.await.unwrap().unwrap().ends_with(b"old"));

        let bytes = h.cache.fetch_blob(&key).await.unwrap();
        assert!(bytes.ends_with(b"new"));
        assert_eq!(h.calls(), 2);
    }

    #[tokio::test]
    async fn test_replacing_slot_drops_inflight_thumbnail() {
        let h = slow_harness();
        let report_id = h.report_with_chart(1, &format!("{}&tag=old", NAMED)).await;
        let key = CacheKey::Cached {
            report_id: report_id.clone(),
            ordering: 0,
            window: ValidityWindow::new("2020-01-01", "2020-12-31"),
        };

        let inflight = {
            let cache = h.cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.fetch_blob(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.cache
            .save_chart_to_report(&report_id, replacement(format!("{}&tag=new", NAMED)))
            .await
            .unwrap();
        inflight.await.unwrap().unwrap();

        assert!(h.cache.store().get(&key).await.unwrap().is_none());
        assert!(h.cache.fetch_blob(&key).await.unwrap().ends_with(b"new"));
    }

    #[tokio::test]
    async fn test_removing_report_waits_for_inflight_render() {
        let h = slow_harness();
        let report_id = h.report_with_chart(1, NAMED).await;
        let key = CacheKey::Cached {
            report_id: report_id.clone(),
            ordering: 0,
            window: ValidityWindow::new("2020-01-01", "2020-12-31"),
        };

        let inflight = {
            let cache = h.cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.fetch_blob(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.cache.remove_report(&report_id).await.unwrap(), 1);
        inflight.await.unwrap().unwrap();
        assert!(h.cache.store().get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_volatile_default_counts_each_fetch_once() {
        let h = Harness::new();
        let rank = h.pool_chart(1, NAMED).await;
        let key = CacheKey::Volatile {
            owner: 1,
            rank,
            did: String::new(),
            window: None,
        };

        h.cache.fetch_blob(&key).await.unwrap();
        let stats = h.cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (0, 1));

        h.cache.fetch_blob(&key).await.unwrap();
        let stats = h.cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }
}
