use std::collections::BTreeMap;

use indexmap::IndexMap;
use market_data_client::models::indicator::IndicatorSeries;

use crate::overlay::model::{OverlayPoint, OverlaySeries, Pane, SeriesKind};

const PALETTE: [&str; 8] = [
    "#2962ff", "#ff6d00", "#00c853", "#d500f9", "#ffd600", "#00b8d4", "#ff1744", "#8d6e63",
];

/// Indicators drawn on their own scale below the price pane.
const OSCILLATORS: [&str; 10] = [
    "rsi", "macd", "stoch", "cci", "atr", "adx", "mfi", "willr", "williams", "obv",
];

pub fn overlay_id(indicator: &str, field: &str) -> String {
    format!("{indicator}:{field}")
}

pub fn pane_for(indicator: &str) -> Pane {
    let name = indicator.trim().to_lowercase();
    if OSCILLATORS.iter().any(|o| name.starts_with(o)) {
        Pane::Oscillator
    } else {
        Pane::Price
    }
}

pub fn kind_for(field: &str) -> SeriesKind {
    let field = field.trim().to_lowercase();
    if field.contains("hist") || field == "volume" {
        SeriesKind::Histogram
    } else {
        SeriesKind::Line
    }
}

/// Turns indicator results into the overlay set that should be on the chart.
///
/// Every field of every indicator becomes one series. Colours are handed out
/// in output order so the same inputs always get the same colours.
pub fn desired_overlays(results: &[IndicatorSeries]) -> Vec<OverlaySeries> {
    let mut out = Vec::new();
    for series in results {
        let pane = pane_for(&series.name);
        for field in series.fields() {
            let points = series
                .rows
                .iter()
                .map(|row| OverlayPoint {
                    timestamp_ms: row.timestamp,
                    value: row.values.get(field).copied().flatten(),
                })
                .collect();
            out.push(OverlaySeries {
                id: overlay_id(&series.name, field),
                kind: kind_for(field),
                pane,
                color: String::new(),
                points,
            });
        }
    }

    let mut merged = merge_overlays(out);
    for (i, series) in merged.iter_mut().enumerate() {
        series.color = PALETTE[i % PALETTE.len()].to_string();
    }
    merged
}

/// Merges series sharing an id and puts every point list in timestamp order.
///
/// The first series seen for an id decides its kind, pane and colour. When two
/// points share a timestamp the later one wins.
pub fn merge_overlays(series: impl IntoIterator<Item = OverlaySeries>) -> Vec<OverlaySeries> {
    let mut by_id: IndexMap<String, OverlaySeries> = IndexMap::new();
    for s in series {
        match by_id.get_mut(&s.id) {
            Some(existing) => existing.points.extend(s.points),
            None => {
                by_id.insert(s.id.clone(), s);
            }
        }
    }

    by_id
        .into_values()
        .map(|mut s| {
            s.points = sorted_points(s.points);
            s
        })
        .collect()
}

fn sorted_points(points: Vec<OverlayPoint>) -> Vec<OverlayPoint> {
    let by_ts: BTreeMap<i64, Option<f64>> = points
        .into_iter()
        .map(|p| (p.timestamp_ms, p.value))
        .collect();
    by_ts
        .into_iter()
        .map(|(timestamp_ms, value)| OverlayPoint {
            timestamp_ms,
            value,
        })
        .collect()
}
