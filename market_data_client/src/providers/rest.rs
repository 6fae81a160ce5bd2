//! HTTP implementation of [`MarketDataProvider`](crate::providers::MarketDataProvider).

mod provider;
mod response;

pub use provider::{RestEndpoints, RestProvider};
pub use response::{parse_candles, parse_indicator};
