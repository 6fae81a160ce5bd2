use std::num::NonZeroU32;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use snafu::{ResultExt, ensure};
use tracing::{debug, instrument};

use crate::{
    models::{
        candle::CandleSeries,
        indicator::IndicatorSeries,
        request_params::{CandleRequest, IndicatorQuery},
    },
    providers::{
        ApiSnafu, MarketDataProvider, ProviderError, ReqwestSnafu, ValidationSnafu,
        rest::response::{parse_candles, parse_indicator},
    },
};

/// Where the REST collaborators live.
#[derive(Debug, Clone)]
pub struct RestEndpoints {
    pub base_url: String,
    pub candles_path: String,
    pub indicators_path: String,
}

impl RestEndpoints {
    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

pub struct RestProvider {
    client: Client,
    endpoints: RestEndpoints,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl RestProvider {
    /// Creates a provider on top of an already-authenticated client
    /// (see [`build_http_client`](crate::providers::http::build_http_client)).
    pub fn new(client: Client, endpoints: RestEndpoints) -> Self {
        Self {
            client,
            endpoints,
            limiter: None,
        }
    }

    /// Paces requests to at most `per_second` per second.
    pub fn with_rate_limit(mut self, per_second: NonZeroU32) -> Self {
        self.limiter = Some(RateLimiter::direct(Quota::per_second(per_second)));
        self
    }

    async fn get_text(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<String, ProviderError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = self.endpoints.url(path);
        debug!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .context(ReqwestSnafu)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown API error".to_string());
            return ApiSnafu {
                status: status.as_u16(),
                message,
            }
            .fail();
        }

        response.text().await.context(ReqwestSnafu)
    }
}

#[async_trait]
impl MarketDataProvider for RestProvider {
    #[instrument(skip(self), fields(symbol = %req.symbol, timeframe = %req.timeframe))]
    async fn fetch_candles(&self, req: CandleRequest) -> Result<CandleSeries, ProviderError> {
        ensure!(
            !req.symbol.trim().is_empty(),
            ValidationSnafu {
                message: "symbol cannot be empty"
            }
        );
        ensure!(
            req.limit > 0,
            ValidationSnafu {
                message: "limit must be positive"
            }
        );

        let body = self
            .get_text(&self.endpoints.candles_path, &req.to_query())
            .await?;
        let series = parse_candles(&body, &req.symbol, req.timeframe)?;
        debug!(count = series.len(), "candles received");
        Ok(series)
    }

    #[instrument(skip(self), fields(symbol = %query.symbol, indicator = %query.indicator))]
    async fn fetch_indicator(
        &self,
        query: IndicatorQuery,
    ) -> Result<IndicatorSeries, ProviderError> {
        ensure!(
            !query.indicator.name.is_empty(),
            ValidationSnafu {
                message: "indicator name cannot be empty"
            }
        );

        let body = self
            .get_text(&self.endpoints.indicators_path, &query.to_query())
            .await?;
        let series = parse_indicator(&body, &query.indicator.name)?;
        debug!(rows = series.rows.len(), "indicator received");
        Ok(series)
    }
}
