use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cache::sanitize_session_id;
use crate::util::strip_bom;

/// The JSON document a statusline host writes to stdin on every refresh.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StatuslinePayload {
    pub session_id: Option<String>,
    pub transcript_path: Option<PathBuf>,
    pub model: Option<ModelInfo>,
    pub cost: Option<CostInfo>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ModelInfo {
    pub id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CostInfo {
    pub total_cost_usd: Option<f64>,
}

/// Returns `None` for blank input.
pub fn parse_payload(raw: &str) -> Result<Option<StatuslinePayload>> {
    let cleaned = strip_bom(raw).replace('\0', "");
    if cleaned.trim().is_empty() {
        return Ok(None);
    }
    let payload = serde_json::from_str(&cleaned).context("invalid statusline payload")?;
    Ok(Some(payload))
}

impl StatuslinePayload {
    /// The host's session id, or a stable fallback derived from the transcript
    /// file name, or finally the process id. Always sanitized.
    pub fn resolved_session_id(&self, pid: u32) -> String {
        let raw = self
            .session_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(ToString::to_string)
            .or_else(|| {
                self.transcript_path
                    .as_ref()
                    .and_then(|path| path.file_stem())
                    .and_then(|stem| stem.to_str())
                    .filter(|stem| !stem.is_empty())
                    .map(|stem| format!("fallback-{stem}"))
            })
            .unwrap_or_else(|| format!("fallback-{pid}"));
        sanitize_session_id(&raw)
    }

    pub fn model_id(&self) -> Option<&str> {
        let model = self.model.as_ref()?;
        [model.id.as_deref(), model.display_name.as_deref()]
            .into_iter()
            .flatten()
            .find(|id| !id.trim().is_empty())
    }

    pub fn total_cost_usd(&self) -> Option<f64> {
        self.cost
            .as_ref()
            .and_then(|cost| cost.total_cost_usd)
            .filter(|cost| cost.is_finite())
    }
}
