//! Application configuration: parsing, normalization, and loading.
//!
//! The TOML file describes where the backend lives and what a default analysis
//! asks for:
//! - `[api]`: base URL, endpoint paths, session header name, request pacing
//! - `[analysis]`: candle limit and the indicators to overlay
//! - `[stream]`: event channel capacity
//!
//! Credentials are never read from this file. The bearer token and session id
//! come from the environment (see `market_data_client::providers::http`).
//!
//! Entrypoints:
//! - Parse + normalize from a TOML string: [`load_config_str`]
//! - Parse + normalize from a file path: [`load_config_path`]

use std::{collections::HashSet, mem, num::NonZeroU32};

use analysis_stream::session::{DEFAULT_CHANNEL_CAPACITY, SessionConfig};
use anyhow::{Context, bail};
use indexmap::IndexMap;
use market_data_client::{
    models::indicator::IndicatorRequest,
    providers::{http::DEFAULT_SESSION_HEADER, rest::RestEndpoints},
};
use serde::{Deserialize, Serialize};
use toml::from_str;
use tracing::debug;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub api: ApiCfg,
    #[serde(default)]
    pub analysis: AnalysisCfg,
    #[serde(default)]
    pub stream: StreamCfg,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApiCfg {
    pub base_url: String,
    #[serde(default = "default_candles_path")]
    pub candles_path: String,
    #[serde(default = "default_indicators_path")]
    pub indicators_path: String,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default = "default_session_header")]
    pub session_header: String,
    /// Upper bound on REST calls per second; unlimited when absent.
    pub requests_per_second: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisCfg {
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
    #[serde(default)]
    pub indicators: Vec<IndicatorCfg>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorCfg {
    pub name: String,
    #[serde(default)]
    pub params: IndexMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StreamCfg {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_candles_path() -> String {
    "/api/candles".into()
}

fn default_indicators_path() -> String {
    "/api/indicators".into()
}

fn default_stream_path() -> String {
    "/api/analysis/stream".into()
}

fn default_session_header() -> String {
    DEFAULT_SESSION_HEADER.into()
}

fn default_candle_limit() -> u32 {
    500
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for AnalysisCfg {
    fn default() -> Self {
        Self {
            candle_limit: default_candle_limit(),
            indicators: Vec::new(),
        }
    }
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl IndicatorCfg {
    pub fn to_request(&self) -> IndicatorRequest {
        IndicatorRequest {
            name: self.name.clone(),
            params: self.params.clone(),
        }
    }
}

impl AppConfig {
    pub fn endpoints(&self) -> RestEndpoints {
        RestEndpoints {
            base_url: self.api.base_url.clone(),
            candles_path: self.api.candles_path.clone(),
            indicators_path: self.api.indicators_path.clone(),
        }
    }

    pub fn rate_limit(&self) -> Option<NonZeroU32> {
        self.api.requests_per_second.and_then(NonZeroU32::new)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            channel_capacity: self.stream.channel_capacity,
        }
    }

    pub fn indicator_requests(&self) -> Vec<IndicatorRequest> {
        self.analysis
            .indicators
            .iter()
            .map(IndicatorCfg::to_request)
            .collect()
    }
}

/// Summary of changes performed during normalization.
#[derive(Debug, Default)]
pub struct NormalizationReport {
    /// Indicator names that changed when lowercasing/trimming.
    pub indicators_renamed: usize,
    /// Indicators dropped because an identical one came earlier.
    pub indicators_deduped: usize,
}

/// Normalize a config in-place.
///
/// - Trim the base URL and reject an empty one
/// - Lowercase + trim indicator names; reject empty names
/// - Drop repeated indicators (same name and params), keeping the first
/// - Reject a zero candle limit, channel capacity or request rate
pub fn normalize_config(cfg: &mut AppConfig) -> anyhow::Result<NormalizationReport> {
    let mut report = NormalizationReport::default();

    cfg.api.base_url = cfg.api.base_url.trim().to_string();
    if cfg.api.base_url.is_empty() {
        bail!("api.base_url cannot be empty");
    }
    if cfg.api.session_header.trim().is_empty() {
        bail!("api.session_header cannot be empty");
    }
    if cfg.api.requests_per_second == Some(0) {
        bail!("api.requests_per_second must be at least 1");
    }
    if cfg.analysis.candle_limit == 0 {
        bail!("analysis.candle_limit must be at least 1");
    }
    if cfg.stream.channel_capacity == 0 {
        bail!("stream.channel_capacity must be at least 1");
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(cfg.analysis.indicators.len());
    for mut ind in mem::take(&mut cfg.analysis.indicators) {
        let name = ind.name.trim().to_lowercase();
        if name.is_empty() {
            bail!("indicator name cannot be empty after trimming");
        }
        if name != ind.name {
            report.indicators_renamed += 1;
        }
        ind.name = name;

        let key = ind.to_request().to_string();
        if seen.insert(key) {
            out.push(ind);
        } else {
            report.indicators_deduped += 1;
        }
    }
    cfg.analysis.indicators = out;

    Ok(report)
}

/// Parse and normalize a config from a TOML string.
pub fn load_config_str(toml_str: &str) -> anyhow::Result<AppConfig> {
    let mut cfg: AppConfig = from_str(toml_str).context("failed to parse config TOML")?;
    let report = normalize_config(&mut cfg).context("normalize_config failed")?;
    debug!(?report, "config normalized");
    Ok(cfg)
}

/// Read a config TOML file from disk, parse, and normalize it.
pub fn load_config_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("read config file {}", path.as_ref().display()))?;
    load_config_str(&text)
}
