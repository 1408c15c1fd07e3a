//! Chart Cache - A rendering cache for report chart images
//!
//! Decides whether a rendered chart can be reused or must be rendered again,
//! and keeps the result in the chart pool, report slots, or on disk.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod render;
pub mod tasks;
pub mod timeframe;

pub use api::AppState;
pub use cache::ChartCache;
pub use config::Config;
pub use error::{ChartCacheError, Result};
pub use tasks::spawn_sweep_task;
