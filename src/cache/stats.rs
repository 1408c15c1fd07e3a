//! Cache Statistics Module
//!
//! Tracks how often stored charts are served versus re-rendered.

use serde::Serialize;

use crate::cache::staleness::Usability;

// == Cache Stats ==
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Fetches served from a stored blob
    pub hits: u64,
    /// Fetches that needed a render
    pub misses: u64,
    /// Misses caused by a window change
    pub stale_windows: u64,
    /// Misses caused by a payload without PNG signature
    pub corrupt_blobs: u64,
    /// Render gateway calls that succeeded
    pub renders: u64,
    /// Render gateway calls that failed
    pub render_failures: u64,
    /// Cache files removed by eviction or sweep
    pub evictions: u64,
    /// Rows currently in the chart pool
    pub pool_entries: usize,
    /// Slots currently in reports
    pub report_slots: usize,
}

impl CacheStats {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if nothing was fetched yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    // == Record ==
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    /// Counts a miss, broken down by why the stored blob was rejected.
    pub fn record_miss(&mut self, reason: Usability) {
        self.misses += 1;
        match reason {
            Usability::WindowChanged => self.stale_windows += 1,
            Usability::CorruptHeader => self.corrupt_blobs += 1,
            _ => {}
        }
    }

    pub fn record_render(&mut self, ok: bool) {
        if ok {
            self.renders += 1;
        } else {
            self.render_failures += 1;
        }
    }

    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    pub fn set_table_sizes(&mut self, pool_entries: usize, report_slots: usize) {
        self.pool_entries = pool_entries;
        self.report_slots = report_slots;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.renders, 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_miss(Usability::Missing);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_miss_reasons() {
        let mut stats = CacheStats::new();
        stats.record_miss(Usability::WindowChanged);
        stats.record_miss(Usability::CorruptHeader);
        stats.record_miss(Usability::Empty);

        assert_eq!(stats.misses, 3);
        assert_eq!(stats.stale_windows, 1);
        assert_eq!(stats.corrupt_blobs, 1);
    }

    #[test]
    fn test_render_outcomes() {
        let mut stats = CacheStats::new();
        stats.record_render(true);
        stats.record_render(false);
        stats.record_evictions(3);

        assert_eq!(stats.renders, 1);
        assert_eq!(stats.render_failures, 1);
        assert_eq!(stats.evictions, 3);
    }
}
