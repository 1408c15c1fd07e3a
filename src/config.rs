//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::path::PathBuf;

use crate::render::RenderSettings;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Directory holding the volatile and cached chart files
    pub cache_dir: PathBuf,
    /// Age in seconds after which a chart file is swept
    pub file_cache_ttl: u64,
    /// Background sweep interval in seconds
    pub sweep_interval: u64,
    /// Base URL of the chart rendering service
    pub render_base_url: String,
    /// Render request timeout in seconds
    pub render_timeout: u64,
    /// Rendered image width in pixels
    pub render_width: u32,
    /// Rendered image height in pixels
    pub render_height: u32,
    /// Rendered image scale factor
    pub render_scale: u32,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CHART_CACHE_DIR` - File cache directory (default: `<tmp>/chart_cache`)
    /// - `FILE_CACHE_TTL` - File cache entry lifetime in seconds (default: 3600)
    /// - `SWEEP_INTERVAL` - Sweep frequency in seconds (default: 300, at least 1)
    /// - `RENDER_BASE_URL` - Render service base URL (default: `http://127.0.0.1:8080/render`)
    /// - `RENDER_TIMEOUT` - Render request timeout in seconds (default: 30)
    /// - `RENDER_WIDTH` / `RENDER_HEIGHT` / `RENDER_SCALE` - Image geometry (default: 800x600, 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            cache_dir: env::var("CHART_CACHE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            file_cache_ttl: parse_var("FILE_CACHE_TTL").unwrap_or(defaults.file_cache_ttl),
            sweep_interval: parse_var("SWEEP_INTERVAL")
                .unwrap_or(defaults.sweep_interval)
                .max(MIN_SWEEP_INTERVAL),
            render_base_url: env::var("RENDER_BASE_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.render_base_url),
            render_timeout: parse_var("RENDER_TIMEOUT").unwrap_or(defaults.render_timeout),
            render_width: parse_var("RENDER_WIDTH").unwrap_or(defaults.render_width),
            render_height: parse_var("RENDER_HEIGHT").unwrap_or(defaults.render_height),
            render_scale: parse_var("RENDER_SCALE").unwrap_or(defaults.render_scale),
        }
    }

    /// Image geometry handed to the render gateway.
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            width: self.render_width,
            height: self.render_height,
            scale: self.render_scale,
        }
    }
}

/// Shortest pause between two file cache sweeps, in seconds.
pub const MIN_SWEEP_INTERVAL: u64 = 1;

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cache_dir: env::temp_dir().join("chart_cache"),
            file_cache_ttl: 3600,
            sweep_interval: 300,
            render_base_url: "http://127.0.0.1:8080/render".to_string(),
            render_timeout: 30,
            render_width: 800,
            render_height: 600,
            render_scale: 1,
        }
    }
}
