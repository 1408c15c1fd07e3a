//! Cache Key Module
//!
//! Identifies which tier and slot a chart blob lives in, extracts the few
//! chart spec fields the cache cares about, and resolves the window a chart
//! should currently cover.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::form_urlencoded;

use crate::cache::ValidityWindow;
use crate::error::{ChartCacheError, Result};
use crate::timeframe::{PeriodResolver, TimeframeSpec};

/// Owner (user) identifier.
pub type OwnerId = u64;

/// Report identifier, formatted `"<owner>-<uid>"`.
pub type ReportId = String;

// == Tier ==
/// Storage tier a chart blob is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Owner-scoped chart pool table
    ChartPool,
    /// Report slot table
    Report,
    /// Speculative previews cached on disk
    Volatile,
    /// Date-overridden report thumbnails cached on disk
    Cached,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::ChartPool => "chart_pool",
            Tier::Report => "report",
            Tier::Volatile => "volatile",
            Tier::Cached => "cached",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ChartCacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chart_pool" => Ok(Tier::ChartPool),
            "report" => Ok(Tier::Report),
            "volatile" => Ok(Tier::Volatile),
            "cached" => Ok(Tier::Cached),
            other => Err(ChartCacheError::InvalidRequest(format!(
                "Invalid thumbnail type value supplied: {}",
                other
            ))),
        }
    }
}

// == Cache Key ==
/// Address of one cached chart blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Pool {
        owner: OwnerId,
        rank: u64,
    },
    Report {
        report_id: ReportId,
        ordering: u32,
    },
    /// `window` is `None` for the default preview of a pool chart.
    Volatile {
        owner: OwnerId,
        rank: u64,
        did: String,
        window: Option<ValidityWindow>,
    },
    Cached {
        report_id: ReportId,
        ordering: u32,
        window: ValidityWindow,
    },
}

impl CacheKey {
    pub fn tier(&self) -> Tier {
        match self {
            CacheKey::Pool { .. } => Tier::ChartPool,
            CacheKey::Report { .. } => Tier::Report,
            CacheKey::Volatile { .. } => Tier::Volatile,
            CacheKey::Cached { .. } => Tier::Cached,
        }
    }

    /// Identity used for per-key mutual exclusion.
    ///
    /// Cached thumbnails share the lock of their report slot.
    pub fn lock_key(&self) -> String {
        match self {
            CacheKey::Cached {
                report_id,
                ordering,
                ..
            } => report_slot_lock(report_id, *ordering),
            _ => self.to_string(),
        }
    }
}

/// Lock guarding every blob derived from one report slot.
pub fn report_slot_lock(report_id: &str, ordering: u32) -> String {
    format!("report:{}:{}", report_id, ordering)
}

/// Slot label of a volatile preview: the pool rank, suffixed with `-<did>`
/// when the preview is a duplicate.
pub fn volatile_slot(rank: u64, did: &str) -> String {
    if did.is_empty() {
        rank.to_string()
    } else {
        format!("{}-{}", rank, did)
    }
}

/// `tier:owner_or_report:slot`, plus the window for filesystem variants.
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Pool { owner, rank } => write!(f, "chart_pool:{}:{}", owner, rank),
            CacheKey::Report {
                report_id,
                ordering,
            } => f.write_str(&report_slot_lock(report_id, *ordering)),
            CacheKey::Volatile {
                owner,
                rank,
                did,
                window,
            } => {
                let slot = volatile_slot(*rank, did);
                match window {
                    Some(w) => write!(f, "volatile:{}:{}:{}_{}", owner, slot, w.start, w.end),
                    None => write!(f, "volatile:{}:{}", owner, slot),
                }
            }
            CacheKey::Cached {
                report_id,
                ordering,
                window,
            } => write!(
                f,
                "cached:{}:{}:{}_{}",
                report_id, ordering, window.start, window.end
            ),
        }
    }
}

// == Image Request ==
/// Raw parameters of an image request, as received by the image endpoint.
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub tier: String,
    pub reference: String,
    pub did: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl ImageRequest {
    /// Validates the request and turns it into a cache key.
    ///
    /// `owner` is the requesting owner; a reference naming anyone else is
    /// rejected.
    pub fn into_key(self, owner: OwnerId) -> Result<CacheKey> {
        let tier: Tier = self.tier.parse()?;
        let did = self.did.unwrap_or_default();
        if !did.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ChartCacheError::InvalidRequest(
                "Invalid duplication id".to_string(),
            ));
        }

        let window = match (self.start, self.end) {
            (Some(start), Some(end)) => {
                if !is_iso_date(&start) || !is_iso_date(&end) {
                    return Err(ChartCacheError::InvalidRequest(
                        "Invalid start and/or end date supplied".to_string(),
                    ));
                }
                Some(ValidityWindow::new(start, end))
            }
            (None, None) => None,
            _ => {
                return Err(ChartCacheError::InvalidRequest(
                    "Start and end dates must be supplied together".to_string(),
                ))
            }
        };

        let (ref_owner, key) = match tier {
            Tier::ChartPool | Tier::Volatile => {
                let (ref_owner, rank) = parse_pool_ref(&self.reference)?;
                let key = if tier == Tier::ChartPool {
                    CacheKey::Pool {
                        owner: ref_owner,
                        rank,
                    }
                } else {
                    CacheKey::Volatile {
                        owner: ref_owner,
                        rank,
                        did,
                        window,
                    }
                };
                (ref_owner, key)
            }
            Tier::Report => {
                let (ref_owner, report_id, ordering) = parse_report_ref(&self.reference)?;
                (
                    ref_owner,
                    CacheKey::Report {
                        report_id,
                        ordering,
                    },
                )
            }
            Tier::Cached => {
                let (ref_owner, report_id, ordering) = parse_report_ref(&self.reference)?;
                let window = window.ok_or_else(|| {
                    ChartCacheError::InvalidRequest("Start and end dates not set".to_string())
                })?;
                (
                    ref_owner,
                    CacheKey::Cached {
                        report_id,
                        ordering,
                        window,
                    },
                )
            }
        };

        if ref_owner != owner {
            return Err(ChartCacheError::Forbidden(format!(
                "Invalid user request. Expected {}, actual: {}",
                owner, ref_owner
            )));
        }

        Ok(key)
    }
}

/// Parses `"<owner>;<rank>"`.
fn parse_pool_ref(reference: &str) -> Result<(OwnerId, u64)> {
    let invalid = || ChartCacheError::InvalidRequest("Invalid thumbnail reference set".to_string());
    let (owner, rank) = reference.split_once(';').ok_or_else(invalid)?;
    if !is_digits(owner) || !is_digits(rank) {
        return Err(invalid());
    }
    Ok((
        owner.parse().map_err(|_| invalid())?,
        rank.parse().map_err(|_| invalid())?,
    ))
}

/// Parses `"<owner>-<uid>;<ordering>"` into (owner, report id, ordering).
fn parse_report_ref(reference: &str) -> Result<(OwnerId, ReportId, u32)> {
    let invalid = || ChartCacheError::InvalidRequest("Invalid thumbnail reference set".to_string());
    let (report_id, ordering) = reference.rsplit_once(';').ok_or_else(invalid)?;
    let owner = parse_report_id(report_id).ok_or_else(invalid)?;
    if !is_digits(ordering) {
        return Err(invalid());
    }
    Ok((
        owner,
        report_id.to_string(),
        ordering.parse().map_err(|_| invalid())?,
    ))
}

/// Returns the owner encoded in a report id, if the id is well formed.
///
/// The uid part may only hold ASCII alphanumerics and dots so the id can be
/// embedded in file names.
pub fn parse_report_id(report_id: &str) -> Option<OwnerId> {
    let (owner, uid) = report_id.split_once('-')?;
    if !is_digits(owner) || uid.is_empty() {
        return None;
    }
    if !uid.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'.') {
        return None;
    }
    owner.parse().ok()
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `YYYY-MM-DD`, digits only; calendar validity is not checked.
fn is_iso_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

// == Chart Spec Fields ==
/// Finds a `name=value` fragment whose key is exactly `name`.
///
/// Returns the byte range of the value. Fragments are separated by `&` or `/`.
fn fragment_value(spec: &str, name: &str) -> Option<(usize, usize)> {
    let needle = format!("{}=", name);
    let mut search_from = 0;

    while let Some(found) = spec[search_from..].find(&needle) {
        let at = search_from + found;
        let on_boundary = at == 0 || matches!(spec.as_bytes()[at - 1], b'&' | b'/');
        if on_boundary {
            let value_start = at + needle.len();
            let value_end = spec[value_start..]
                .find(|c: char| c == '&' || c == '/')
                .map(|i| value_start + i)
                .unwrap_or(spec.len());
            return Some((value_start, value_end));
        }
        search_from = at + needle.len();
    }

    None
}

/// Extracts the raw value of parameter `name` from a chart spec.
///
/// Missing parameters yield an empty string.
pub fn parameter_in<'a>(spec: &'a str, name: &str) -> &'a str {
    fragment_value(spec, name)
        .map(|(start, end)| &spec[start..end])
        .unwrap_or("")
}

/// Form-decodes a single parameter value (`+` and `%xx` escapes).
pub fn decode_component(raw: &str) -> String {
    form_urlencoded::parse(format!("v={}", raw).as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

/// Rewrites the `title=` fragment of `spec` to the form-escaped `title`.
///
/// Two specs that differ only in how the title was escaped normalize to the
/// same string. Specs without a title fragment are returned unchanged.
pub fn normalize_spec(spec: &str, title: &str) -> String {
    match fragment_value(spec, "title") {
        Some((start, end)) => {
            let escaped: String = form_urlencoded::byte_serialize(title.as_bytes()).collect();
            format!("{}{}{}", &spec[..start], escaped, &spec[end..])
        }
        None => spec.to_string(),
    }
}

/// Timeframe a pool chart covers, read from its spec.
pub fn timeframe_from_spec(spec: &str) -> TimeframeSpec {
    TimeframeSpec::from_label(
        &decode_component(parameter_in(spec, "timeframe_label")),
        parameter_in(spec, "start_date"),
        parameter_in(spec, "end_date"),
    )
}

/// Timeframe a report chart covers.
///
/// User defined bounds come from the `"<start> to <end>"` date description
/// when it has that shape, otherwise from the spec.
pub fn timeframe_for_report(timeframe_type: &str, date_description: &str, spec: &str) -> TimeframeSpec {
    let (start, end) = match date_description.split_once(" to ") {
        Some((start, end)) => (start.trim(), end.trim()),
        None => (parameter_in(spec, "start_date"), parameter_in(spec, "end_date")),
    };
    TimeframeSpec::from_label(timeframe_type, start, end)
}

// == Window Resolution ==
/// Resolves the window a chart should cover right now.
///
/// User defined windows are returned verbatim. The result must only be used
/// for one staleness check; named windows change from one day to the next.
pub fn resolve_window(
    timeframe: &TimeframeSpec,
    resolver: &dyn PeriodResolver,
    now: DateTime<Utc>,
) -> Result<ValidityWindow> {
    match timeframe {
        TimeframeSpec::UserDefined { start, end } => Ok(ValidityWindow::new(start, end)),
        TimeframeSpec::Named { label } => resolver.resolve(label, now),
    }
}
