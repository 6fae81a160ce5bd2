use serde::Serialize;

/// One value of an overlay. `None` marks "not enough data yet" and is drawn as a gap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverlayPoint {
    pub timestamp_ms: i64,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Line,
    Histogram,
}

/// Plotting region a series lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pane {
    /// Shares the price axis with the candles.
    Price,
    /// Secondary pane with its own scale.
    Oscillator,
}

impl Pane {
    pub const fn id(self) -> &'static str {
        match self {
            Pane::Price => "price",
            Pane::Oscillator => "oscillator",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlaySeries {
    /// Reconciliation key, `"{indicator}:{field}"`.
    pub id: String,
    pub kind: SeriesKind,
    pub pane: Pane,
    pub color: String,
    pub points: Vec<OverlayPoint>,
}
