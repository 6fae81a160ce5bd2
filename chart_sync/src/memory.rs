//! A [`DrawingSurface`] that keeps everything in memory.
//!
//! Used by the CLI to collect what would be drawn, and by tests to count operations.

use std::collections::BTreeMap;

use market_data_client::models::candle::Candle;

use crate::overlay::{DrawingSurface, OverlayPoint, Pane, SeriesKind, SurfaceError};

#[derive(Debug, Clone, PartialEq)]
pub struct DrawnSeries {
    pub id: String,
    pub kind: SeriesKind,
    pub pane: Pane,
    pub color: String,
    pub points: Vec<OverlayPoint>,
}

#[derive(Debug, Default)]
pub struct MemorySurface {
    next_handle: u64,
    series: BTreeMap<u64, DrawnSeries>,
    candles: Vec<Candle>,
    created: usize,
    removed: usize,
    data_writes: usize,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn series(&self) -> impl Iterator<Item = &DrawnSeries> {
        self.series.values()
    }

    pub fn by_id(&self, id: &str) -> Option<&DrawnSeries> {
        self.series.values().find(|s| s.id == id)
    }

    /// Overlay ids in drawing order.
    pub fn ids(&self) -> Vec<&str> {
        self.series.values().map(|s| s.id.as_str()).collect()
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn removed(&self) -> usize {
        self.removed
    }

    pub fn data_writes(&self) -> usize {
        self.data_writes
    }
}

impl DrawingSurface for MemorySurface {
    type Handle = u64;

    fn set_candles(&mut self, candles: &[Candle]) -> Result<(), SurfaceError> {
        self.candles = candles.to_vec();
        Ok(())
    }

    fn create_series(
        &mut self,
        id: &str,
        kind: SeriesKind,
        pane: Pane,
        color: &str,
    ) -> Result<u64, SurfaceError> {
        self.next_handle += 1;
        self.series.insert(
            self.next_handle,
            DrawnSeries {
                id: id.to_string(),
                kind,
                pane,
                color: color.to_string(),
                points: Vec::new(),
            },
        );
        self.created += 1;
        Ok(self.next_handle)
    }

    fn set_data(&mut self, handle: &u64, points: &[OverlayPoint]) -> Result<(), SurfaceError> {
        let series = self
            .series
            .get_mut(handle)
            .ok_or_else(|| SurfaceError::UnknownHandle(handle.to_string()))?;
        series.points = points.to_vec();
        self.data_writes += 1;
        Ok(())
    }

    fn remove_series(&mut self, handle: u64) -> Result<(), SurfaceError> {
        self.series
            .remove(&handle)
            .ok_or_else(|| SurfaceError::UnknownHandle(handle.to_string()))?;
        self.removed += 1;
        Ok(())
    }
}
