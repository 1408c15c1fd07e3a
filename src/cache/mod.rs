//! Cache Module
//!
//! Chart image caching over three tiers: an owner's chart pool, report
//! slots, and files on disk for previews and date-overridden thumbnails.
//! A stored image is only reused while the window it was rendered for still
//! matches and its payload is a PNG.

mod blob;
pub mod entry;
pub mod files;
pub mod key;
mod lock;
mod orchestrator;
pub mod staleness;
mod stats;
mod store;
pub mod tables;


// Re-export public types
pub use blob::{has_png_signature, CachedBlob, ValidityWindow, PNG_SIGNATURE};
pub use entry::{NewPoolChart, NewReportChart, PoolChartSummary, Report, ReportChartSummary};
pub use files::FileCache;
pub use key::{CacheKey, ImageRequest, OwnerId, ReportId, Tier};
pub use lock::KeyedLocks;
pub use orchestrator::ChartCache;
pub use staleness::Usability;
pub use stats::CacheStats;
pub use store::{BlobStore, DeleteScope};
pub use tables::ChartTables;
