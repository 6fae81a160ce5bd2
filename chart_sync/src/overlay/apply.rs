use std::{collections::BTreeMap, fmt};

use market_data_client::models::candle::Candle;
use thiserror::Error;
use tracing::debug;

use crate::overlay::{
    diff::{OverlayDiff, make_diff},
    model::{OverlayPoint, OverlaySeries, Pane, SeriesKind},
    want::merge_overlays,
};

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("unknown series handle {0}")]
    UnknownHandle(String),

    #[error("surface rejected {op}: {message}")]
    Rejected { op: &'static str, message: String },
}

#[derive(Debug, Error)]
#[error("failed to {op} overlay '{id}': {source}")]
pub struct ReconcileError {
    pub op: &'static str,
    pub id: String,
    #[source]
    pub source: SurfaceError,
}

/// The imperative chart API the reconciler drives.
pub trait DrawingSurface {
    type Handle: Clone + fmt::Debug + Send + Sync + 'static;

    /// Replaces the base candle series.
    fn set_candles(&mut self, candles: &[Candle]) -> Result<(), SurfaceError>;

    fn create_series(
        &mut self,
        id: &str,
        kind: SeriesKind,
        pane: Pane,
        color: &str,
    ) -> Result<Self::Handle, SurfaceError>;

    /// Replaces all data of a series.
    fn set_data(&mut self, handle: &Self::Handle, points: &[OverlayPoint])
    -> Result<(), SurfaceError>;

    fn remove_series(&mut self, handle: Self::Handle) -> Result<(), SurfaceError>;
}

/// Overlay ids currently drawn and their handles.
///
/// One reconciler belongs to one analysis run; a new run starts from an empty one.
#[derive(Debug)]
pub struct OverlayReconciler<H> {
    live: BTreeMap<String, H>,
}

impl<H> Default for OverlayReconciler<H> {
    fn default() -> Self {
        Self {
            live: BTreeMap::new(),
        }
    }
}

impl<H: Clone> OverlayReconciler<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_ids(&self) -> impl Iterator<Item = &str> {
        self.live.keys().map(String::as_str)
    }

    pub fn handle(&self, id: &str) -> Option<&H> {
        self.live.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Makes the surface show exactly `desired`.
    ///
    /// Series sharing an id are merged and points sorted first. Stale series
    /// are removed, new ones created, and every desired series gets its full
    /// point list pushed again. Existing handles are reused.
    pub fn reconcile<S>(
        &mut self,
        surface: &mut S,
        desired: Vec<OverlaySeries>,
    ) -> Result<OverlayDiff, ReconcileError>
    where
        S: DrawingSurface<Handle = H>,
    {
        let desired = merge_overlays(desired);
        let diff = make_diff(self.live.keys(), &desired);

        // a handle is forgotten only once the surface has dropped the series
        for id in &diff.remove {
            if let Some(handle) = self.live.get(id).cloned() {
                debug!(overlay_id = %id, "remove overlay");
                surface
                    .remove_series(handle)
                    .map_err(|source| ReconcileError {
                        op: "remove",
                        id: id.clone(),
                        source,
                    })?;
                self.live.remove(id);
            }
        }

        for series in &desired {
            let handle = match self.live.get(&series.id) {
                Some(handle) => handle.clone(),
                None => {
                    debug!(overlay_id = %series.id, pane = series.pane.id(), "create overlay");
                    let handle = surface
                        .create_series(&series.id, series.kind, series.pane, &series.color)
                        .map_err(|source| ReconcileError {
                            op: "create",
                            id: series.id.clone(),
                            source,
                        })?;
                    self.live.insert(series.id.clone(), handle.clone());
                    handle
                }
            };
            surface
                .set_data(&handle, &series.points)
                .map_err(|source| ReconcileError {
                    op: "update",
                    id: series.id.clone(),
                    source,
                })?;
        }

        Ok(diff)
    }

    /// Removes every series this reconciler drew. Returns how many were removed.
    ///
    /// Stops at the first failure; series not yet removed stay tracked.
    pub fn clear<S>(&mut self, surface: &mut S) -> Result<usize, ReconcileError>
    where
        S: DrawingSurface<Handle = H>,
    {
        let mut removed = 0;
        while let Some((id, handle)) = self
            .live
            .first_key_value()
            .map(|(id, handle)| (id.clone(), handle.clone()))
        {
            surface
                .remove_series(handle)
                .map_err(|source| ReconcileError {
                    op: "remove",
                    id: id.clone(),
                    source,
                })?;
            self.live.remove(&id);
            removed += 1;
        }
        Ok(removed)
    }
}
