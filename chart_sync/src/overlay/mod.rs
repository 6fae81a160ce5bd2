//! Overlay synchronization.
//!
//! Mirrors indicator results onto a stateful drawing surface in three steps:
//! - **want**: derive the desired [`OverlaySeries`] set from indicator payloads,
//!   merging series that share an id.
//! - **diff**: compare it with the ids already drawn ([`OverlayDiff`]).
//! - **apply**: remove stale series, create missing ones and push full data to
//!   every desired series ([`OverlayReconciler`]).
//!
//! Only `apply` touches the [`DrawingSurface`].

mod apply;
mod diff;
mod model;
mod want;

pub use apply::{DrawingSurface, OverlayReconciler, ReconcileError, SurfaceError};
pub use diff::{OverlayDiff, SeriesSummary, make_diff};
pub use model::{OverlayPoint, OverlaySeries, Pane, SeriesKind};
pub use want::{desired_overlays, kind_for, merge_overlays, overlay_id, pane_for};
