//! Chart Entry Module
//!
//! Rows of the chart pool and report tables, and the inputs used to create
//! them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::key::{
    decode_component, normalize_spec, parameter_in, timeframe_for_report, timeframe_from_spec,
    OwnerId, ReportId, Tier,
};
use crate::timeframe::TimeframeSpec;

// == Chart Entry ==
/// One addressable chart, independent of the tier it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartEntry {
    pub owner: OwnerId,
    /// Insertion rank in the pool, ordering in a report
    pub slot_id: u64,
    pub spec: String,
    pub title: String,
    pub drill_details: String,
    pub date_description: String,
    pub timeframe: TimeframeSpec,
    pub tier: Tier,
    /// Free-form chart type tag set by the caller (e.g. the originating module)
    pub entry_type: String,
}

// == New Chart Inputs ==
/// A chart to be queued in an owner's pool.
#[derive(Debug, Clone, Default)]
pub struct NewPoolChart {
    pub spec: String,
    pub title: String,
    pub drill_details: String,
    pub date_description: String,
    pub entry_type: String,
}

/// A chart to be placed into a report slot.
#[derive(Debug, Clone, Default)]
pub struct NewReportChart {
    pub ordering: u32,
    pub spec: String,
    pub title: String,
    pub drill_details: String,
    pub date_description: String,
    pub timeframe_type: String,
    pub entry_type: String,
}

// == Pool Row ==
#[derive(Debug, Clone)]
pub struct PoolRow {
    pub entry: ChartEntry,
    /// Spec with its title fragment normalized; unique per owner
    pub normalized_spec: String,
    /// Encoded blob, empty until first render
    pub image_data: Vec<u8>,
}

impl PoolRow {
    pub fn new(owner: OwnerId, rank: u64, chart: NewPoolChart) -> Self {
        let normalized_spec = normalize_spec(&chart.spec, &chart.title);
        let timeframe = timeframe_from_spec(&chart.spec);

        Self {
            entry: ChartEntry {
                owner,
                slot_id: rank,
                spec: chart.spec,
                title: chart.title,
                drill_details: chart.drill_details,
                date_description: chart.date_description,
                timeframe,
                tier: Tier::ChartPool,
                entry_type: chart.entry_type,
            },
            normalized_spec,
            image_data: Vec::new(),
        }
    }

    /// True if `spec` names this row, either verbatim or once normalized
    /// against this row's title.
    pub fn matches_spec(&self, spec: &str) -> bool {
        self.entry.spec == spec || self.normalized_spec == normalize_spec(spec, &self.entry.title)
    }

    pub fn summary(&self) -> PoolChartSummary {
        PoolChartSummary {
            chart_id: self.entry.spec.clone(),
            insertion_rank: self.entry.slot_id,
            thumbnail_ref: format!("{};{}", self.entry.owner, self.entry.slot_id),
            chart_title: self.entry.title.clone(),
            chart_drill_details: self.entry.drill_details.clone(),
            chart_date_description: self.entry.date_description.clone(),
            entry_type: self.entry.entry_type.clone(),
            timeframe_type: decode_component(parameter_in(&self.entry.spec, "timeframe_label")),
        }
    }
}

// == Report ==
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub report_id: ReportId,
    pub owner: OwnerId,
    pub name: String,
    pub charts_per_page: u32,
    pub last_modified: DateTime<Utc>,
}

// == Report Slot ==
#[derive(Debug, Clone)]
pub struct ReportSlot {
    pub report_id: ReportId,
    pub entry: ChartEntry,
    /// Timeframe label as stored with the slot
    pub timeframe_type: String,
    /// Encoded blob, empty until first render
    pub image_data: Vec<u8>,
}

impl ReportSlot {
    pub fn new(report_id: ReportId, owner: OwnerId, chart: NewReportChart, image_data: Vec<u8>) -> Self {
        let timeframe =
            timeframe_for_report(&chart.timeframe_type, &chart.date_description, &chart.spec);

        Self {
            report_id,
            entry: ChartEntry {
                owner,
                slot_id: u64::from(chart.ordering),
                spec: chart.spec,
                title: chart.title,
                drill_details: chart.drill_details,
                date_description: chart.date_description,
                timeframe,
                tier: Tier::Report,
                entry_type: chart.entry_type,
            },
            timeframe_type: chart.timeframe_type,
            image_data,
        }
    }

    pub fn summary(&self) -> ReportChartSummary {
        ReportChartSummary {
            chart_id: self.entry.spec.clone(),
            ordering: self.entry.slot_id,
            thumbnail_ref: format!("{};{}", self.report_id, self.entry.slot_id),
            chart_title: self.entry.title.clone(),
            chart_drill_details: self.entry.drill_details.clone(),
            chart_date_description: self.entry.date_description.clone(),
            timeframe_type: self.timeframe_type.clone(),
            entry_type: self.entry.entry_type.clone(),
            has_image: !self.image_data.is_empty(),
        }
    }
}

// == Summaries ==
/// Pool listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct PoolChartSummary {
    pub chart_id: String,
    pub insertion_rank: u64,
    pub thumbnail_ref: String,
    pub chart_title: String,
    pub chart_drill_details: String,
    pub chart_date_description: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub timeframe_type: String,
}

/// Report listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct ReportChartSummary {
    pub chart_id: String,
    pub ordering: u64,
    pub thumbnail_ref: String,
    pub chart_title: String,
    pub chart_drill_details: String,
    pub chart_date_description: String,
    pub timeframe_type: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub has_image: bool,
}
