//! Client side of the analysis event stream.
//!
//! Bytes from the backend go through [`frame::FrameParser`], become typed
//! [`event::StreamEvent`]s, are delivered in order by a [`session::StreamSession`],
//! and are folded into an [`state::AnalysisViewState`] by the pure [`state::reduce`].

pub mod event;
pub mod frame;
pub mod model;
pub mod session;
pub mod state;
pub mod transport;
