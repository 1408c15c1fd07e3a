//! API Module
//!
//! HTTP handlers and routing for the chart cache REST API.
//!
//! # Endpoints
//! - `GET /owners/:owner/image` - Serve a chart image, rendering it if stale
//! - `GET|POST|DELETE /owners/:owner/pool` - List, queue, or remove pool charts
//! - `POST /owners/:owner/pool/clear` - Forget the pool's rendered images
//! - `DELETE /owners/:owner/pool/all` - Empty the pool
//! - `POST /owners/:owner/reports` - Create a report
//! - `DELETE /owners/:owner/cache` - Flush the owner's cached images
//! - `GET|DELETE /reports/:report_id/charts` - List or remove report charts
//! - `PUT /reports/:report_id/charts/:ordering` - Place a chart in a report
//! - `DELETE /reports/:report_id` - Delete a report
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
