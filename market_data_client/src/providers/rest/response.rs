use serde::Deserialize;
use snafu::ResultExt;

use crate::{
    models::{
        candle::{Candle, CandleSeries},
        indicator::{IndicatorRow, IndicatorSeries},
        timeframe::TimeFrame,
    },
    providers::{DecodeSnafu, ProviderError},
};

/// One OHLCV row as the candle endpoint sends it: either a bare
/// `[ts, open, high, low, close, volume]` array or an object.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum CandleRow {
    Array(i64, f64, f64, f64, f64, f64),
    Object {
        #[serde(alias = "t", alias = "timestamp_ms", alias = "time")]
        timestamp: i64,
        #[serde(alias = "o")]
        open: f64,
        #[serde(alias = "h")]
        high: f64,
        #[serde(alias = "l")]
        low: f64,
        #[serde(alias = "c")]
        close: f64,
        #[serde(alias = "v", default)]
        volume: f64,
    },
}

impl From<CandleRow> for Candle {
    fn from(row: CandleRow) -> Self {
        match row {
            CandleRow::Array(timestamp_ms, open, high, low, close, volume)
            | CandleRow::Object {
                timestamp: timestamp_ms,
                open,
                high,
                low,
                close,
                volume,
            } => Candle {
                timestamp_ms,
                open,
                high,
                low,
                close,
                volume,
            },
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum CandlesResponse {
    Rows(Vec<CandleRow>),
    Wrapped { candles: Vec<CandleRow> },
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum IndicatorResponse {
    Rows(Vec<IndicatorRow>),
    Wrapped { data: Vec<IndicatorRow> },
}

/// Decodes a candle endpoint body into a validated series.
pub fn parse_candles(
    body: &str,
    symbol: &str,
    timeframe: TimeFrame,
) -> Result<CandleSeries, ProviderError> {
    let rows = match serde_json::from_str::<CandlesResponse>(body)
        .context(DecodeSnafu { what: "candles" })?
    {
        CandlesResponse::Rows(rows) | CandlesResponse::Wrapped { candles: rows } => rows,
    };
    let candles = rows.into_iter().map(Candle::from).collect();
    Ok(CandleSeries::from_unordered(symbol, timeframe, candles))
}

/// Decodes an indicator endpoint body. Rows are sorted ascending by timestamp.
pub fn parse_indicator(body: &str, name: &str) -> Result<IndicatorSeries, ProviderError> {
    let mut rows = match serde_json::from_str::<IndicatorResponse>(body)
        .context(DecodeSnafu { what: "indicator" })?
    {
        IndicatorResponse::Rows(rows) | IndicatorResponse::Wrapped { data: rows } => rows,
    };
    rows.sort_by_key(|r| r.timestamp);
    Ok(IndicatorSeries {
        name: name.to_string(),
        rows,
    })
}
