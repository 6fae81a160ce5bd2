//! Indicator requests and the per-timestamp values the backend computes for them.

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid indicator spec '{spec}': {message}")]
pub struct IndicatorSpecError {
    pub spec: String,
    pub message: String,
}

/// One indicator to compute, e.g. `bbands` with `period=20, std=2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRequest {
    /// Indicator name as the backend knows it (lowercase, e.g. "sma", "rsi", "bbands").
    pub name: String,
    /// Numeric parameters, in the order they were given.
    #[serde(default)]
    pub params: IndexMap<String, f64>,
}

impl IndicatorRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_lowercase(),
            params: IndexMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Params encoded as `k=v,k=v` for a query string; empty when there are none.
    pub fn params_query(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for IndicatorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.name, self.params_query())
        }
    }
}

impl FromStr for IndicatorRequest {
    type Err = IndicatorSpecError;

    /// Parses `name` or `name:key=value,key=value`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |message: String| IndicatorSpecError {
            spec: s.to_string(),
            message,
        };

        let (name, rest) = match s.split_once(':') {
            Some((name, rest)) => (name, Some(rest)),
            None => (s, None),
        };
        let mut req = IndicatorRequest::new(name);
        if req.name.is_empty() {
            return Err(err("indicator name cannot be empty".into()));
        }

        for pair in rest.into_iter().flat_map(|r| r.split(',')) {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| err(format!("expected key=value, got '{pair}'")))?;
            let value = value
                .trim()
                .parse::<f64>()
                .map_err(|e| err(format!("param '{key}': {e}")))?;
            req.params.insert(key.trim().to_string(), value);
        }
        Ok(req)
    }
}

/// Values of one indicator at one timestamp, keyed by field name (e.g. `upper`, `middle`).
///
/// `None` means the backend had insufficient data for that index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub timestamp: i64,
    #[serde(default)]
    pub values: IndexMap<String, Option<f64>>,
}

/// Everything one indicator call returned.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub name: String,
    pub rows: Vec<IndicatorRow>,
}

impl IndicatorSeries {
    /// Field names in first-seen order across all rows.
    pub fn fields(&self) -> Vec<&str> {
        let mut seen: IndexMap<&str, ()> = IndexMap::new();
        for row in &self.rows {
            for key in row.values.keys() {
                seen.entry(key.as_str()).or_default();
            }
        }
        seen.into_keys().collect()
    }
}
