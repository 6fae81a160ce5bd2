//! Provider abstraction for the analysis backend's REST endpoints.
//!
//! This module defines the [`MarketDataProvider`] trait, which serves as a unified interface
//! for fetching the base candle series and indicator payloads for a symbol.
//!
//! The concrete HTTP implementation lives in [`rest`]; tests and offline tools can
//! provide their own implementation.
//!
//! The trait is designed for async usage and supports dynamic dispatch (`dyn MarketDataProvider`).
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use market_data_client::models::{
//!     candle::CandleSeries,
//!     indicator::IndicatorSeries,
//!     request_params::{CandleRequest, IndicatorQuery},
//! };
//! use market_data_client::providers::{MarketDataProvider, ProviderError};
//!
//! struct EmptyProvider;
//!
//! #[async_trait]
//! impl MarketDataProvider for EmptyProvider {
//!     async fn fetch_candles(&self, req: CandleRequest) -> Result<CandleSeries, ProviderError> {
//!         Ok(CandleSeries::from_unordered(req.symbol, req.timeframe, vec![]))
//!     }
//!
//!     async fn fetch_indicator(&self, q: IndicatorQuery) -> Result<IndicatorSeries, ProviderError> {
//!         Ok(IndicatorSeries { name: q.indicator.name, rows: vec![] })
//!     }
//! }
//! ```

pub mod http;
pub mod rest;

use async_trait::async_trait;
use shared_utils::env::MissingEnvVarError;
use snafu::{Backtrace, Snafu};

use crate::models::{
    candle::CandleSeries,
    indicator::IndicatorSeries,
    request_params::{CandleRequest, IndicatorQuery},
};

/// Source of the base candle series and of indicator payloads.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetches the most recent `limit` candles for a symbol/timeframe.
    async fn fetch_candles(&self, req: CandleRequest) -> Result<CandleSeries, ProviderError>;

    /// Computes one indicator over the most recent `limit` candles.
    async fn fetch_indicator(&self, query: IndicatorQuery)
    -> Result<IndicatorSeries, ProviderError>;
}

/// Errors that can occur while building an HTTP client for the backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderInitError {
    /// missed environment variable.
    #[snafu(display("Missing environment variable: {source}"))]
    MissingEnvVar {
        source: MissingEnvVarError,
        backtrace: Backtrace,
    },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// Token or session id contains characters not allowed in a header.
    #[snafu(display("Invalid credential header value: {source}"))]
    InvalidCredential {
        source: reqwest::header::InvalidHeaderValue,
        backtrace: Backtrace,
    },

    /// The configured session header is not a valid header name.
    #[snafu(display("Invalid session header name '{name}': {source}"))]
    InvalidHeaderName {
        name: String,
        source: reqwest::header::InvalidHeaderName,
        backtrace: Backtrace,
    },
}

/// Errors that can occur within a `MarketDataProvider` implementation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderError {
    /// An error during an API request (e.g., network failure, timeout).
    #[snafu(display("API request failed: {source}"))]
    Reqwest {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The backend answered with a non-success status.
    #[snafu(display("API error (HTTP {status}): {message}"))]
    Api {
        status: u16,
        message: String,
        backtrace: Backtrace,
    },

    /// The response body did not have the expected shape.
    #[snafu(display("Failed to decode {what} response: {source}"))]
    Decode {
        what: &'static str,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    /// The request parameters were invalid for this provider.
    #[snafu(display("Invalid parameters for provider: {message}"))]
    Validation {
        message: String,
        backtrace: Backtrace,
    },

    /// An error during provider configuration or initialization.
    #[snafu(display("Provider initialization error: {source}"))]
    Init {
        #[snafu(backtrace)]
        source: ProviderInitError,
    },
}
