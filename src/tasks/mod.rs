//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - File cache sweep: Removes chart files older than the configured TTL

mod sweep;

pub use sweep::spawn_sweep_task;
