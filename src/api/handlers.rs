//! API Handlers
//!
//! HTTP request handlers for each chart cache endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};

use crate::cache::{ChartCache, FileCache, ImageRequest, OwnerId, Report};
use crate::config::Config;
use crate::error::{ChartCacheError, Result};
use crate::models::{
    ActionResponse, AddPoolChartRequest, CacheFlushResponse, CreateReportRequest, HealthResponse,
    ImageQuery, PoolChartAddedResponse, PoolResponse, RemovePoolChartRequest,
    ReportChartsResponse, SaveReportChartRequest, StatsResponse,
};
use crate::render::{HttpRenderer, RenderGateway};
use crate::timeframe::CalendarPeriodResolver;

/// Application state shared across all handlers.
///
/// `ChartCache` is cheap to clone; every clone shares the same tables, files
/// and locks.
#[derive(Clone)]
pub struct AppState {
    pub cache: ChartCache,
}

impl AppState {
    /// Creates a new AppState around an existing cache.
    pub fn new(cache: ChartCache) -> Self {
        Self { cache }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Every renderer kind is served by one HTTP backend at
    /// `config.render_base_url`; named periods use calendar arithmetic.
    pub fn from_config(config: &Config) -> Result<Self> {
        let renderer = HttpRenderer::new(
            config.render_base_url.clone(),
            Duration::from_secs(config.render_timeout),
        )?;
        let gateway =
            RenderGateway::new(config.render_settings()).with_default_backend(Arc::new(renderer));
        let cache = ChartCache::new(
            FileCache::new(config.cache_dir.clone()),
            gateway,
            Arc::new(CalendarPeriodResolver),
        );
        Ok(Self::new(cache))
    }
}

// == Images ==
/// Handler for GET /owners/:owner/image
///
/// Serves the PNG named by `type`/`ref`, rendering it first if the stored
/// copy is missing or stale.
pub async fn image_handler(
    State(state): State<AppState>,
    Path(owner): Path<OwnerId>,
    Query(query): Query<ImageQuery>,
) -> Result<Response> {
    let key = ImageRequest::from(query).into_key(owner)?;
    let bytes = state.cache.fetch_blob(&key).await?;

    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

// == Pool ==
/// Handler for GET /owners/:owner/pool
pub async fn list_pool_handler(
    State(state): State<AppState>,
    Path(owner): Path<OwnerId>,
) -> Json<PoolResponse> {
    let charts = state.cache.fetch_chart_pool(owner).await;
    Json(PoolResponse::new(owner, charts))
}

/// Handler for POST /owners/:owner/pool
pub async fn add_pool_handler(
    State(state): State<AppState>,
    Path(owner): Path<OwnerId>,
    Json(req): Json<AddPoolChartRequest>,
) -> Result<Json<PoolChartAddedResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(ChartCacheError::InvalidRequest(error_msg));
    }

    let rank = state.cache.add_to_pool(owner, req.into()).await?;
    Ok(Json(PoolChartAddedResponse::new(owner, rank)))
}

/// Handler for DELETE /owners/:owner/pool
pub async fn remove_pool_handler(
    State(state): State<AppState>,
    Path(owner): Path<OwnerId>,
    Json(req): Json<RemovePoolChartRequest>,
) -> Result<Json<ActionResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(ChartCacheError::InvalidRequest(error_msg));
    }

    state.cache.remove_from_pool(owner, &req.chart_id).await?;
    Ok(Json(ActionResponse::new("Chart removed from queue", 1)))
}

/// Handler for POST /owners/:owner/pool/clear
pub async fn clear_pool_handler(
    State(state): State<AppState>,
    Path(owner): Path<OwnerId>,
) -> Result<Json<ActionResponse>> {
    let cleared = state.cache.clear_pool(owner).await?;
    Ok(Json(ActionResponse::new("Pool images cleared", cleared)))
}

/// Handler for DELETE /owners/:owner/pool/all
pub async fn empty_queue_handler(
    State(state): State<AppState>,
    Path(owner): Path<OwnerId>,
) -> Result<Json<ActionResponse>> {
    let removed = state.cache.empty_queue(owner).await?;
    Ok(Json(ActionResponse::new("Queue emptied", removed)))
}

// == Reports ==
/// Handler for POST /owners/:owner/reports
pub async fn create_report_handler(
    State(state): State<AppState>,
    Path(owner): Path<OwnerId>,
    Json(req): Json<CreateReportRequest>,
) -> Result<Json<Report>> {
    if let Some(error_msg) = req.validate() {
        return Err(ChartCacheError::InvalidRequest(error_msg));
    }

    let report = state
        .cache
        .create_report(owner, req.name, req.charts_per_page)
        .await;
    Ok(Json(report))
}

/// Handler for GET /reports/:report_id/charts
pub async fn report_charts_handler(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> Result<Json<ReportChartsResponse>> {
    let charts = state.cache.fetch_report_charts(&report_id).await?;
    Ok(Json(ReportChartsResponse { report_id, charts }))
}

/// Handler for PUT /reports/:report_id/charts/:ordering
pub async fn save_report_chart_handler(
    State(state): State<AppState>,
    Path((report_id, ordering)): Path<(String, u32)>,
    Json(req): Json<SaveReportChartRequest>,
) -> Result<Json<ActionResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(ChartCacheError::InvalidRequest(error_msg));
    }

    state
        .cache
        .save_chart_to_report(&report_id, req.into_chart(ordering))
        .await?;
    Ok(Json(ActionResponse::new("Chart saved to report", 1)))
}

/// Handler for DELETE /reports/:report_id/charts
pub async fn remove_report_charts_handler(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> Result<Json<ActionResponse>> {
    let removed = state.cache.remove_report_charts(&report_id).await?;
    Ok(Json(ActionResponse::new("Report charts removed", removed)))
}

/// Handler for DELETE /reports/:report_id
pub async fn remove_report_handler(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> Result<Json<ActionResponse>> {
    let removed = state.cache.remove_report(&report_id).await?;
    Ok(Json(ActionResponse::new("Report removed", removed)))
}

// == Owner Cache ==
/// Handler for DELETE /owners/:owner/cache
///
/// Drops every cache file keyed to the owner and forgets the rendered images
/// of the owner's report charts.
pub async fn flush_owner_cache_handler(
    State(state): State<AppState>,
    Path(owner): Path<OwnerId>,
) -> Result<Json<CacheFlushResponse>> {
    let files_removed = state.cache.flush_image_cache(owner).await?;
    let report_images_cleared = state.cache.empty_report_cache(owner).await?;

    Ok(Json(CacheFlushResponse {
        owner,
        files_removed,
        report_images_cleared,
    }))
}

// == Service ==
/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats().await))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
