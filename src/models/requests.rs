//! Request DTOs for the chart cache API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;

use crate::cache::{ImageRequest, NewPoolChart, NewReportChart};

/// Query string of the image endpoint (GET /owners/:owner/image)
#[derive(Debug, Clone, Deserialize)]
pub struct ImageQuery {
    /// Tier: `chart_pool`, `report`, `volatile` or `cached`
    #[serde(rename = "type")]
    pub tier: String,
    /// Thumbnail reference, `"<owner>;<rank>"` or `"<report_id>;<ordering>"`
    #[serde(rename = "ref")]
    pub reference: String,
    /// Duplication id of a volatile preview
    #[serde(default)]
    pub did: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

impl From<ImageQuery> for ImageRequest {
    fn from(query: ImageQuery) -> Self {
        // Empty query values mean "not set"
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        ImageRequest {
            tier: query.tier,
            reference: query.reference,
            did: non_empty(query.did),
            start: non_empty(query.start),
            end: non_empty(query.end),
        }
    }
}

/// Request body for queueing a chart (POST /owners/:owner/pool)
#[derive(Debug, Clone, Deserialize)]
pub struct AddPoolChartRequest {
    /// The chart spec
    pub chart_id: String,
    #[serde(default)]
    pub chart_title: String,
    #[serde(default)]
    pub chart_drill_details: String,
    #[serde(default)]
    pub chart_date_description: String,
    #[serde(default, rename = "type")]
    pub entry_type: String,
}

impl AddPoolChartRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_chart_id(&self.chart_id)
    }
}

impl From<AddPoolChartRequest> for NewPoolChart {
    fn from(req: AddPoolChartRequest) -> Self {
        NewPoolChart {
            spec: req.chart_id,
            title: req.chart_title,
            drill_details: req.chart_drill_details,
            date_description: req.chart_date_description,
            entry_type: req.entry_type,
        }
    }
}

/// Request body for removing a queued chart (DELETE /owners/:owner/pool)
#[derive(Debug, Clone, Deserialize)]
pub struct RemovePoolChartRequest {
    pub chart_id: String,
}

impl RemovePoolChartRequest {
    pub fn validate(&self) -> Option<String> {
        if self.chart_id.is_empty() {
            return Some("chart_id cannot be empty".to_string());
        }
        None
    }
}

fn validate_chart_id(chart_id: &str) -> Option<String> {
    if chart_id.trim().is_empty() {
        return Some("chart_id cannot be empty".to_string());
    }
    if chart_id.contains(|c: char| c == '\n' || c == '\r') {
        return Some("chart_id cannot contain line breaks".to_string());
    }
    None
}

fn default_charts_per_page() -> u32 {
    1
}

/// Request body for creating a report (POST /owners/:owner/reports)
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReportRequest {
    pub name: String,
    #[serde(default = "default_charts_per_page")]
    pub charts_per_page: u32,
}

impl CreateReportRequest {
    pub fn validate(&self) -> Option<String> {
        if self.name.trim().is_empty() {
            return Some("Report name cannot be empty".to_string());
        }
        if self.charts_per_page == 0 {
            return Some("charts_per_page must be at least 1".to_string());
        }
        None
    }
}

/// Request body for placing a chart in a report
/// (PUT /reports/:report_id/charts/:ordering)
#[derive(Debug, Clone, Deserialize)]
pub struct SaveReportChartRequest {
    pub chart_id: String,
    #[serde(default)]
    pub chart_title: String,
    #[serde(default)]
    pub chart_drill_details: String,
    /// `"<start> to <end>"` for user defined timeframes
    #[serde(default)]
    pub chart_date_description: String,
    #[serde(default)]
    pub timeframe_type: String,
    #[serde(default, rename = "type")]
    pub entry_type: String,
}

impl SaveReportChartRequest {
    pub fn validate(&self) -> Option<String> {
        validate_chart_id(&self.chart_id)
    }

    pub fn into_chart(self, ordering: u32) -> NewReportChart {
        NewReportChart {
            ordering,
            spec: self.chart_id,
            title: self.chart_title,
            drill_details: self.chart_drill_details,
            date_description: self.chart_date_description,
            timeframe_type: self.timeframe_type,
            entry_type: self.entry_type,
        }
    }
}
