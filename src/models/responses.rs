//! Response DTOs for the chart cache API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheStats, OwnerId, PoolChartSummary, ReportChartSummary, ReportId};

/// Response body for a newly queued chart (POST /owners/:owner/pool)
#[derive(Debug, Clone, Serialize)]
pub struct PoolChartAddedResponse {
    pub message: String,
    pub insertion_rank: u64,
    /// Reference to pass to the image endpoint
    pub thumbnail_ref: String,
}

impl PoolChartAddedResponse {
    pub fn new(owner: OwnerId, insertion_rank: u64) -> Self {
        Self {
            message: "Chart added to queue".to_string(),
            insertion_rank,
            thumbnail_ref: format!("{};{}", owner, insertion_rank),
        }
    }
}

/// Response body for the pool listing (GET /owners/:owner/pool)
#[derive(Debug, Clone, Serialize)]
pub struct PoolResponse {
    pub owner: OwnerId,
    pub total: usize,
    pub charts: Vec<PoolChartSummary>,
}

impl PoolResponse {
    pub fn new(owner: OwnerId, charts: Vec<PoolChartSummary>) -> Self {
        Self {
            owner,
            total: charts.len(),
            charts,
        }
    }
}

/// Response body for the report chart listing (GET /reports/:report_id/charts)
#[derive(Debug, Clone, Serialize)]
pub struct ReportChartsResponse {
    pub report_id: ReportId,
    pub charts: Vec<ReportChartSummary>,
}

/// Response body for operations that change rows, images or files
#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    /// Success message
    pub message: String,
    /// How many rows, images or files were affected
    pub count: usize,
}

impl ActionResponse {
    pub fn new(message: impl Into<String>, count: usize) -> Self {
        Self {
            message: message.into(),
            count,
        }
    }
}

/// Response body for an owner cache flush (DELETE /owners/:owner/cache)
#[derive(Debug, Clone, Serialize)]
pub struct CacheFlushResponse {
    pub owner: OwnerId,
    pub files_removed: usize,
    pub report_images_cleared: usize,
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Misses caused by a changed window
    pub stale_windows: u64,
    /// Misses caused by a payload that is not a PNG
    pub corrupt_blobs: u64,
    pub renders: u64,
    pub render_failures: u64,
    /// Number of cache files removed
    pub evictions: u64,
    pub pool_entries: usize,
    pub report_slots: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl From<CacheStats> for StatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            hits: stats.hits,
            misses: stats.misses,
            stale_windows: stats.stale_windows,
            corrupt_blobs: stats.corrupt_blobs,
            renders: stats.renders,
            render_failures: stats.render_failures,
            evictions: stats.evictions,
            pool_entries: stats.pool_entries,
            report_slots: stats.report_slots,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_chart_added_response() {
        let resp = PoolChartAddedResponse::new(7, 2);
        assert_eq!(resp.thumbnail_ref, "7;2");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"insertion_rank\":2"));
    }

    #[test]
    fn test_stats_response_hit_rate() {
        let mut stats = CacheStats::new();
        for _ in 0..4 {
            stats.record_hit();
        }
        stats.record_miss(crate::cache::Usability::Missing);
        let resp = StatsResponse::from(stats);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);
    }

    #[test]
    fn test_stats_response_zero_requests() {
        let resp = StatsResponse::from(CacheStats::new());
        assert_eq!(resp.hit_rate, 0.0);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse::new("Something went wrong");
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"error":"Something went wrong"}"#);
    }
}
