//! Render Module
//!
//! Turns a chart spec plus the window it should cover into PNG bytes by
//! dispatching to a registered rendering backend.
//!
//! # Dispatch
//! | module | operation | kind |
//! |---|---|---|
//! | `metric_explorer` | `get_data` | MetricExplorer |
//! | `usage_explorer` | `get_data` | MetricExplorer |
//! | `data_explorer` | `get_ak_plot` | DataExplorer |
//! | `custom_query` | `get_data` | CustomQuery |
//! | anything else | | Usage |
//!
//! Specs without `controller_module`/`operation` are legacy: they render
//! through MetricExplorer when `format=hc_jsonstore`, Usage otherwise.

pub mod http;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cache::key::decode_component;
use crate::cache::{has_png_signature, ValidityWindow};
use crate::error::{ChartCacheError, Result};

pub use http::HttpRenderer;

/// Decoded chart parameters, keyed by name.
pub type ParamMap = BTreeMap<String, String>;

// == Renderer Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererKind {
    MetricExplorer,
    DataExplorer,
    CustomQuery,
    Usage,
}

impl RendererKind {
    /// Default `(module, operation)` endpoint of this kind.
    pub fn endpoint(&self) -> (&'static str, &'static str) {
        match self {
            RendererKind::MetricExplorer => ("metric_explorer", "get_data"),
            RendererKind::DataExplorer => ("data_explorer", "get_ak_plot"),
            RendererKind::CustomQuery => ("custom_query", "get_data"),
            RendererKind::Usage => ("usage", "get_charts"),
        }
    }
}

const DISPATCH: &[(&str, &str, RendererKind)] = &[
    ("metric_explorer", "get_data", RendererKind::MetricExplorer),
    ("usage_explorer", "get_data", RendererKind::MetricExplorer),
    ("data_explorer", "get_ak_plot", RendererKind::DataExplorer),
    ("custom_query", "get_data", RendererKind::CustomQuery),
];

/// Picks the backend kind for a chart's parameters.
pub fn select_renderer(params: &ParamMap) -> RendererKind {
    let module = params.get("controller_module").map(String::as_str);
    let operation = params.get("operation").map(String::as_str);

    match (module, operation) {
        (Some(module), Some(operation)) => DISPATCH
            .iter()
            .find(|(m, o, _)| *m == module && *o == operation)
            .map(|(_, _, kind)| *kind)
            .unwrap_or(RendererKind::Usage),
        _ if params.get("format").map(String::as_str) == Some("hc_jsonstore") => {
            RendererKind::MetricExplorer
        }
        _ => RendererKind::Usage,
    }
}

/// Splits a chart spec into decoded parameters. A repeated name keeps its
/// last value.
pub fn parse_spec_params(spec: &str) -> ParamMap {
    spec.split(|c: char| c == '&' || c == '/')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (decode_component(name), decode_component(value)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

// == Render Settings ==
/// Output geometry requested from every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub scale: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            scale: 1,
        }
    }
}

/// Parameters forced onto every report render.
pub fn report_overrides(window: &ValidityWindow, settings: &RenderSettings) -> ParamMap {
    [
        ("render_for_report", "y".to_string()),
        ("start_date", window.start.clone()),
        ("end_date", window.end.clone()),
        ("format", "png_inline".to_string()),
        ("scale", settings.scale.to_string()),
        ("width", settings.width.to_string()),
        ("height", settings.height.to_string()),
        ("show_title", "n".to_string()),
        ("title", String::new()),
        ("subtitle", String::new()),
        ("show_filters", "false".to_string()),
        ("font_size", "3".to_string()),
        ("show_guide_lines", "y".to_string()),
        ("show_gradient", "n".to_string()),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}

// == Chart Renderer ==
/// A rendering backend.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    /// Renders the chart described by `params` and returns the raw image.
    async fn render(&self, kind: RendererKind, params: &ParamMap) -> Result<Vec<u8>>;
}

// == Render Gateway ==
#[derive(Clone, Default)]
pub struct RenderGateway {
    backends: HashMap<RendererKind, Arc<dyn ChartRenderer>>,
    fallback: Option<Arc<dyn ChartRenderer>>,
    settings: RenderSettings,
}

impl RenderGateway {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            backends: HashMap::new(),
            fallback: None,
            settings,
        }
    }

    /// Registers the backend for one kind.
    pub fn with_backend(mut self, kind: RendererKind, backend: Arc<dyn ChartRenderer>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    /// Registers the backend used for kinds without their own.
    pub fn with_default_backend(mut self, backend: Arc<dyn ChartRenderer>) -> Self {
        self.fallback = Some(backend);
        self
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Renders `spec` for `window`.
    ///
    /// The report overrides win over the spec's own parameters. Anything that
    /// does not start with the PNG signature is rejected.
    pub async fn render(&self, spec: &str, window: &ValidityWindow) -> Result<Vec<u8>> {
        let mut params = parse_spec_params(spec);
        let kind = select_renderer(&params);
        params.extend(report_overrides(window, &self.settings));

        let backend = self
            .backends
            .get(&kind)
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                ChartCacheError::NotFound(format!("no renderer registered for {:?}", kind))
            })?;

        debug!(?kind, window = %window, "Rendering chart");
        let bytes = backend.render(kind, &params).await?;
        if !has_png_signature(&bytes) {
            return Err(ChartCacheError::Render(format!(
                "{:?} renderer returned {} bytes without a PNG signature",
                kind,
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

impl fmt::Debug for RenderGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderGateway")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}
