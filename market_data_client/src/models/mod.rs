pub mod candle;
pub mod indicator;
pub mod request_params;
pub mod timeframe;
