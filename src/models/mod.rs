//! Request and Response models for the chart cache API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{
    AddPoolChartRequest, CreateReportRequest, ImageQuery, RemovePoolChartRequest,
    SaveReportChartRequest,
};
pub use responses::{
    ActionResponse, CacheFlushResponse, ErrorResponse, HealthResponse, PoolChartAddedResponse,
    PoolResponse, ReportChartsResponse, StatsResponse,
};
