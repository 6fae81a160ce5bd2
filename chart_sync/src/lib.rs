//! Projects a streamed market analysis onto a chart.
//!
//! [`orchestrator`] drives one run: candles, the event stream, and indicator
//! overlays reconciled through [`overlay`]. [`controller`] keeps at most one run
//! per drawing surface.

pub mod config;
pub mod controller;
pub mod memory;
pub mod orchestrator;
pub mod overlay;
