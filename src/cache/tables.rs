//! Chart Tables Module
//!
//! In-process metadata store for the chart pool and report tables. Callers
//! hold it behind an `RwLock`; every allocating method runs under the write
//! lock, so ranks and orderings are never handed out twice.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::cache::entry::{NewPoolChart, NewReportChart, PoolRow, Report, ReportSlot};
use crate::cache::key::{OwnerId, ReportId};
use crate::error::{ChartCacheError, Result};

// == Chart Tables ==
#[derive(Debug, Default)]
pub struct ChartTables {
    /// Pool rows keyed by (owner, insertion rank)
    pool: BTreeMap<(OwnerId, u64), PoolRow>,
    /// Next rank to hand out per owner
    next_rank: HashMap<OwnerId, u64>,
    reports: HashMap<ReportId, Report>,
    /// Report slots keyed by (report, ordering)
    slots: BTreeMap<(ReportId, u32), ReportSlot>,
    report_seq: u64,
}

impl ChartTables {
    pub fn new() -> Self {
        Self::default()
    }

    // == Pool: Insert ==
    /// Queues a chart for `owner` and returns its insertion rank.
    ///
    /// Ranks start at 0, only ever grow, and are never reused. Specs must fit
    /// on one line of a preview meta file.
    pub fn insert_pool_chart(&mut self, owner: OwnerId, chart: NewPoolChart) -> Result<u64> {
        if chart.spec.contains(|c: char| c == '\n' || c == '\r') {
            return Err(ChartCacheError::InvalidRequest(
                "chart spec cannot contain line breaks".to_string(),
            ));
        }
        let next = self.next_rank.get(&owner).copied().unwrap_or(0);
        let row = PoolRow::new(owner, next, chart);

        if self
            .pool_rows(owner)
            .any(|existing| existing.normalized_spec == row.normalized_spec)
        {
            return Err(ChartCacheError::DuplicateEntry(row.entry.title));
        }

        self.next_rank.insert(owner, next + 1);
        self.pool.insert((owner, next), row);
        Ok(next)
    }

    // == Pool: Remove ==
    /// Removes the pool row naming `spec` and returns its rank.
    pub fn remove_pool_chart(&mut self, owner: OwnerId, spec: &str) -> Result<u64> {
        let rank = self
            .pool_rows(owner)
            .find(|row| row.matches_spec(spec))
            .map(|row| row.entry.slot_id)
            .ok_or_else(|| {
                ChartCacheError::MissingEntry(format!("chart not queued for owner {}", owner))
            })?;

        self.pool.remove(&(owner, rank));
        Ok(rank)
    }

    /// Pool rows of `owner` in rank order.
    pub fn pool_rows(&self, owner: OwnerId) -> impl Iterator<Item = &PoolRow> {
        self.pool
            .range((owner, 0)..=(owner, u64::MAX))
            .map(|(_, row)| row)
    }

    pub fn pool_row(&self, owner: OwnerId, rank: u64) -> Option<&PoolRow> {
        self.pool.get(&(owner, rank))
    }

    /// Replaces the stored image data of a pool row.
    pub fn set_pool_image(&mut self, owner: OwnerId, rank: u64, image_data: Vec<u8>) -> Result<()> {
        let row = self.pool.get_mut(&(owner, rank)).ok_or_else(|| {
            ChartCacheError::NotFound(format!(
                "No (chart_pool) chart entry could be located (owner = {}, insertion_rank = {})",
                owner, rank
            ))
        })?;
        row.image_data = image_data;
        Ok(())
    }

    /// Wipes image data of every pool row of `owner`, keeping the rows.
    pub fn clear_pool_images(&mut self, owner: OwnerId) -> usize {
        let mut cleared = 0;
        for (_, row) in self.pool.range_mut((owner, 0)..=(owner, u64::MAX)) {
            if !row.image_data.is_empty() {
                row.image_data.clear();
                cleared += 1;
            }
        }
        cleared
    }

    /// Removes every pool row of `owner`.
    pub fn remove_pool(&mut self, owner: OwnerId) -> usize {
        let ranks: Vec<u64> = self.pool_rows(owner).map(|row| row.entry.slot_id).collect();
        for rank in &ranks {
            self.pool.remove(&(owner, *rank));
        }
        ranks.len()
    }

    // == Reports ==
    /// Creates an empty report for `owner`.
    pub fn create_report(&mut self, owner: OwnerId, name: String, charts_per_page: u32) -> Report {
        self.report_seq += 1;
        let report = Report {
            report_id: format!("{}-{}", owner, self.report_seq),
            owner,
            name,
            charts_per_page,
            last_modified: Utc::now(),
        };
        self.reports.insert(report.report_id.clone(), report.clone());
        report
    }

    pub fn report(&self, report_id: &str) -> Option<&Report> {
        self.reports.get(report_id)
    }

    /// Inserts or replaces the slot at `chart.ordering`.
    ///
    /// The new slot's image is seeded from the owner's pool row with the same
    /// spec when there is one.
    pub fn upsert_report_chart(&mut self, report_id: &str, chart: NewReportChart) -> Result<()> {
        let report = self.reports.get_mut(report_id).ok_or_else(|| {
            ChartCacheError::MissingEntry(format!("report {} does not exist", report_id))
        })?;
        report.last_modified = Utc::now();
        let owner = report.owner;

        let seeded = self
            .pool_rows(owner)
            .find(|row| row.entry.spec == chart.spec)
            .map(|row| row.image_data.clone())
            .unwrap_or_default();

        let ordering = chart.ordering;
        let slot = ReportSlot::new(report_id.to_string(), owner, chart, seeded);
        self.slots.insert((report_id.to_string(), ordering), slot);
        Ok(())
    }

    /// Slots of `report_id` in display order.
    pub fn report_slots<'a>(&'a self, report_id: &'a str) -> impl Iterator<Item = &'a ReportSlot> {
        self.slots
            .iter()
            .filter(move |((id, _), _)| id == report_id)
            .map(|(_, slot)| slot)
    }

    pub fn report_slot(&self, report_id: &str, ordering: u32) -> Option<&ReportSlot> {
        self.slots.get(&(report_id.to_string(), ordering))
    }

    /// Replaces the stored image data of a report slot.
    pub fn set_report_image(&mut self, report_id: &str, ordering: u32, image_data: Vec<u8>) -> Result<()> {
        let slot = self
            .slots
            .get_mut(&(report_id.to_string(), ordering))
            .ok_or_else(|| {
                ChartCacheError::NotFound(format!(
                    "No (report) chart entry could be located (report_id = {}, ordering = {})",
                    report_id, ordering
                ))
            })?;
        slot.image_data = image_data;
        Ok(())
    }

    /// Wipes image data of every slot of `report_id`, keeping the slots.
    pub fn clear_report_images(&mut self, report_id: &str) -> usize {
        let mut cleared = 0;
        for ((id, _), slot) in self.slots.iter_mut() {
            if id == report_id && !slot.image_data.is_empty() {
                slot.image_data.clear();
                cleared += 1;
            }
        }
        cleared
    }

    /// Wipes image data of every report slot owned by `owner`.
    pub fn clear_owner_report_images(&mut self, owner: OwnerId) -> usize {
        let mut cleared = 0;
        for slot in self.slots.values_mut() {
            if slot.entry.owner == owner && !slot.image_data.is_empty() {
                slot.image_data.clear();
                cleared += 1;
            }
        }
        cleared
    }

    /// Deletes every slot of `report_id`.
    pub fn remove_report_slots(&mut self, report_id: &str) -> usize {
        let before = self.slots.len();
        self.slots.retain(|(id, _), _| id != report_id);
        before - self.slots.len()
    }

    /// Deletes a report and its slots, returning the number of slots removed.
    pub fn remove_report(&mut self, report_id: &str) -> Result<usize> {
        if self.reports.remove(report_id).is_none() {
            return Err(ChartCacheError::MissingEntry(format!(
                "report {} does not exist",
                report_id
            )));
        }
        Ok(self.remove_report_slots(report_id))
    }

    // == Counts ==
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn slot_len(&self) -> usize {
        self.slots.len()
    }
}
