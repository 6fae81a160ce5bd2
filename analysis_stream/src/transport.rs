//! Opening the raw byte stream.
//!
//! [`StreamTransport`] is the seam between the session and the network; tests
//! script it, production uses [`HttpStreamTransport`].

use async_trait::async_trait;
use futures_util::{StreamExt, stream::BoxStream};
use market_data_client::models::{indicator::IndicatorRequest, timeframe::TimeFrame};
use reqwest::{Client, header};
use thiserror::Error;
use tracing::{debug, warn};

pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("stream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("stream endpoint answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream read failed: {0}")]
    Io(String),
}

/// What one analysis stream is scoped to.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub limit: u32,
    pub indicators: Vec<IndicatorRequest>,
}

impl StreamRequest {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("symbol".to_string(), self.symbol.clone()),
            ("timeframe".to_string(), self.timeframe.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        if !self.indicators.is_empty() {
            let names: Vec<&str> = self.indicators.iter().map(|i| i.name.as_str()).collect();
            query.push(("indicators".to_string(), names.join(",")));
        }
        query
    }
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Connects and returns the response body as a stream of chunks.
    ///
    /// Dropping the returned stream must release the connection.
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, TransportError>;
}

pub struct HttpStreamTransport {
    client: Client,
    url: String,
}

impl HttpStreamTransport {
    pub fn new(client: Client, base_url: &str, stream_path: &str) -> Self {
        let url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            stream_path.trim_start_matches('/')
        );
        Self { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    async fn open(&self, request: &StreamRequest) -> Result<ByteStream, TransportError> {
        debug!(url = %self.url, symbol = %request.symbol, timeframe = %request.timeframe, "opening stream");
        let response = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "text/event-stream")
            .query(&request.to_query())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let headers = response.headers();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with("text/event-stream") {
            warn!(content_type, "stream response is not text/event-stream");
        }
        let no_cache = headers
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("no-cache"));
        if !no_cache {
            warn!("stream response is missing Cache-Control: no-cache");
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TransportError::Io(e.to_string()))
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_lists_indicator_names() {
        let request = StreamRequest {
            symbol: "AAPL".into(),
            timeframe: "1d".parse().unwrap(),
            limit: 300,
            indicators: vec![
                IndicatorRequest::new("SMA").with_param("period", 20.0),
                IndicatorRequest::new("rsi"),
            ],
        };
        let query = request.to_query();
        assert_eq!(
            query.last().unwrap(),
            &("indicators".to_string(), "sma,rsi".to_string())
        );
        assert!(query.contains(&("timeframe".to_string(), "1d".to_string())));
    }

    #[test]
    fn joins_base_url_and_path() {
        let t = HttpStreamTransport::new(Client::new(), "http://h:1/", "/api/stream");
        assert_eq!(t.url(), "http://h:1/api/stream");
    }
}
