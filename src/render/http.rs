//! HTTP rendering backend.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ChartRenderer, ParamMap, RendererKind};
use crate::error::{ChartCacheError, Result};

/// Posts chart parameters as a form to a remote rendering service.
///
/// Requests go to `<base_url>/<controller_module>/<operation>`. Legacy specs
/// without those fields, and fields that are not plain `[a-z_]+` names, use
/// the kind's default endpoint.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRenderer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChartCacheError::Render(format!("building http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint_url(&self, kind: RendererKind, params: &ParamMap) -> String {
        let (module, operation) = match (params.get("controller_module"), params.get("operation")) {
            (Some(module), Some(operation))
                if is_path_segment(module) && is_path_segment(operation) =>
            {
                (module.as_str(), operation.as_str())
            }
            _ => kind.endpoint(),
        };
        format!("{}/{}/{}", self.base_url, module, operation)
    }
}

fn is_path_segment(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_lowercase() || b == b'_')
}

#[async_trait]
impl ChartRenderer for HttpRenderer {
    async fn render(&self, kind: RendererKind, params: &ParamMap) -> Result<Vec<u8>> {
        let url = self.endpoint_url(kind, params);
        debug!(url = %url, "Posting render request");

        let resp = self
            .client
            .post(&url)
            .form(params)
            .send()
            .await
            .map_err(|e| ChartCacheError::Render(format!("render request to {} failed: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Renderer answered with an error");
            return Err(ChartCacheError::Render(format!(
                "renderer at {} answered {}",
                url, status
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ChartCacheError::Render(format!("reading render response: {}", e)))?;
        Ok(body.to_vec())
    }
}
