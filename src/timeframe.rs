//! Timeframes
//!
//! A chart either covers an explicit date range or a named period such as
//! "Previous month". Named periods drift with the calendar, so they are
//! resolved against "now" every time a chart is fetched.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::ValidityWindow;
use crate::error::{ChartCacheError, Result};

/// Label marking an explicit, fixed date range.
pub const USER_DEFINED: &str = "User Defined";

const DATE_FORMAT: &str = "%Y-%m-%d";

// == Timeframe Spec ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeframeSpec {
    UserDefined { start: String, end: String },
    Named { label: String },
}

impl TimeframeSpec {
    /// Builds a timeframe from a stored label and the dates stored with it.
    ///
    /// An empty label counts as user defined: there is nothing to resolve, so
    /// the stored dates are the only answer.
    pub fn from_label(label: &str, start: &str, end: &str) -> Self {
        let label = label.trim();
        if label.is_empty() || label.eq_ignore_ascii_case(USER_DEFINED) {
            TimeframeSpec::UserDefined {
                start: start.to_string(),
                end: end.to_string(),
            }
        } else {
            TimeframeSpec::Named {
                label: label.to_string(),
            }
        }
    }

    /// Label as shown to users.
    pub fn label(&self) -> &str {
        match self {
            TimeframeSpec::UserDefined { .. } => USER_DEFINED,
            TimeframeSpec::Named { label } => label,
        }
    }
}

// == Period Resolver ==
/// Turns a named period into concrete dates.
pub trait PeriodResolver: Send + Sync {
    fn resolve(&self, label: &str, now: DateTime<Utc>) -> Result<ValidityWindow>;
}

/// Calendar arithmetic for the standard named periods.
///
/// Supported labels (case-insensitive): `Yesterday`, `7 day`, `30 day`,
/// `90 day`, `Month to date`, `Previous month`, `Quarter to date`,
/// `Previous quarter`, `Year to date`, `Previous year`, `1 year`, `2 year`,
/// `3 year`, `5 year`, `10 year`, and any four digit year.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalendarPeriodResolver;

impl PeriodResolver for CalendarPeriodResolver {
    fn resolve(&self, label: &str, now: DateTime<Utc>) -> Result<ValidityWindow> {
        let (start, end) = period_endpoints(label, now.date_naive())
            .ok_or_else(|| ChartCacheError::Period(format!("unknown timeframe '{}'", label)))?;

        Ok(ValidityWindow::new(
            start.format(DATE_FORMAT).to_string(),
            end.format(DATE_FORMAT).to_string(),
        ))
    }
}

fn period_endpoints(label: &str, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let normalized = label.trim().to_ascii_lowercase();
    let month_start = today.with_day(1)?;
    let quarter_start = NaiveDate::from_ymd_opt(today.year(), quarter_first_month(today), 1)?;
    let year_start = NaiveDate::from_ymd_opt(today.year(), 1, 1)?;

    let range = match normalized.as_str() {
        "yesterday" => {
            let day = today - Duration::days(1);
            (day, day)
        }
        "7 day" => (today - Duration::days(7), today),
        "30 day" => (today - Duration::days(30), today),
        "90 day" => (today - Duration::days(90), today),
        "month to date" => (month_start, today),
        "previous month" => (
            month_start.checked_sub_months(Months::new(1))?,
            month_start - Duration::days(1),
        ),
        "quarter to date" => (quarter_start, today),
        "previous quarter" => (
            quarter_start.checked_sub_months(Months::new(3))?,
            quarter_start - Duration::days(1),
        ),
        "year to date" => (year_start, today),
        "previous year" => calendar_year(today.year() - 1)?,
        "1 year" => (today.checked_sub_months(Months::new(12))?, today),
        "2 year" => (today.checked_sub_months(Months::new(24))?, today),
        "3 year" => (today.checked_sub_months(Months::new(36))?, today),
        "5 year" => (today.checked_sub_months(Months::new(60))?, today),
        "10 year" => (today.checked_sub_months(Months::new(120))?, today),
        year if year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit()) => {
            calendar_year(year.parse().ok()?)?
        }
        _ => return None,
    };

    Some(range)
}

fn quarter_first_month(date: NaiveDate) -> u32 {
    date.month0() / 3 * 3 + 1
}

fn calendar_year(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}
