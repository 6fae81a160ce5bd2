use serde::{Deserialize, Serialize};

use crate::models::{indicator::IndicatorRequest, timeframe::TimeFrame};

/// Parameters for the historical candle endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandleRequest {
    /// Symbol to request (e.g. `"AAPL"`, `"BTCUSDT"`).
    pub symbol: String,

    /// The interval of each candle.
    pub timeframe: TimeFrame,

    /// Maximum number of most recent candles to return.
    pub limit: u32,
}

impl CandleRequest {
    pub fn to_query(&self) -> Vec<(String, String)> {
        vec![
            ("symbol".to_string(), self.symbol.clone()),
            ("timeframe".to_string(), self.timeframe.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ]
    }
}

/// Parameters for one indicator computation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndicatorQuery {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub indicator: IndicatorRequest,
    pub limit: u32,
}

impl IndicatorQuery {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("symbol".to_string(), self.symbol.clone()),
            ("timeframe".to_string(), self.timeframe.to_string()),
            ("indicator".to_string(), self.indicator.name.clone()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        if !self.indicator.params.is_empty() {
            query.push(("params".to_string(), self.indicator.params_query()));
        }
        query
    }
}
