//! Canonical in-memory representation of a time-series candle (OHLCV).
//!
//! This is what every [`MarketDataProvider`](crate::providers::MarketDataProvider)
//! returns for the base price series, regardless of the backend that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::timeframe::TimeFrame;

/// A single OHLCV candle. Immutable once received.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time of the candle, milliseconds since the Unix epoch (UTC).
    pub timestamp_ms: i64,

    /// Opening price.
    pub open: f64,

    /// Highest price during the candle interval.
    pub high: f64,

    /// Lowest price during the candle interval.
    pub low: f64,

    /// Closing price.
    pub close: f64,

    /// Volume traded during the candle interval.
    pub volume: f64,
}

impl Candle {
    /// Open time as a UTC datetime, `None` if the timestamp is out of range.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }
}

/// The base series for one symbol and timeframe.
///
/// Candles are kept sorted ascending by timestamp with no duplicate timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleSeries {
    /// The symbol this data represents (e.g., "AAPL", "BTCUSDT").
    pub symbol: String,
    /// The time interval for each candle in the series.
    pub timeframe: TimeFrame,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Builds a series from candles in any order.
    ///
    /// Sorts ascending by timestamp; when a timestamp repeats, the candle that
    /// arrived last wins.
    pub fn from_unordered(
        symbol: impl Into<String>,
        timeframe: TimeFrame,
        mut candles: Vec<Candle>,
    ) -> Self {
        // stable sort keeps arrival order among equal timestamps
        candles.sort_by_key(|c| c.timestamp_ms);
        let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            match deduped.last_mut() {
                Some(last) if last.timestamp_ms == candle.timestamp_ms => *last = candle,
                _ => deduped.push(candle),
            }
        }
        Self {
            symbol: symbol.into(),
            timeframe,
            candles: deduped,
        }
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            timestamp_ms: ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn sorts_and_keeps_last_duplicate() {
        let series = CandleSeries::from_unordered(
            "AAPL",
            TimeFrame::day(),
            vec![candle(3, 3.0), candle(1, 1.0), candle(3, 30.0), candle(2, 2.0)],
        );
        let closes: Vec<f64> = series.candles().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 30.0]);
        assert_eq!(series.last().map(|c| c.timestamp_ms), Some(3));
    }

    #[test]
    fn converts_timestamp_to_utc() {
        let c = candle(1_700_000_000_000, 1.0);
        assert_eq!(c.time().unwrap().to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    proptest! {
        #[test]
        fn timestamps_strictly_ascending(ts in proptest::collection::vec(-1000i64..1000, 0..64)) {
            let candles = ts.iter().map(|t| candle(*t, 1.0)).collect();
            let series = CandleSeries::from_unordered("X", TimeFrame::day(), candles);
            prop_assert!(series.candles().windows(2).all(|w| w[0].timestamp_ms < w[1].timestamp_ms));
        }
    }
}
