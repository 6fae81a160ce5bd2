//! Client for the REST collaborators of the analysis backend: historical
//! candles and indicator computation.

pub mod models;
pub mod providers;
