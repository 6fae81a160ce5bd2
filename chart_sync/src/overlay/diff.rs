use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::Serialize;

use crate::overlay::model::{OverlaySeries, Pane, SeriesKind};

/// What the surface is told about one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesSummary {
    pub pane: Pane,
    pub kind: SeriesKind,
    pub points: usize,
}

impl From<&OverlaySeries> for SeriesSummary {
    fn from(s: &OverlaySeries) -> Self {
        Self {
            pane: s.pane,
            kind: s.kind,
            points: s.points.len(),
        }
    }
}

/// What needs to change to make the drawn overlays match the desired ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverlayDiff {
    pub create: BTreeMap<String, SeriesSummary>,
    /// Already drawn; their data is replaced in full.
    pub update: BTreeMap<String, SeriesSummary>,
    pub remove: BTreeSet<String>,
}

impl OverlayDiff {
    /// True if no series is created or removed and none has data to push.
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

impl fmt::Display for OverlayDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote_any = false;
        let mut section = |title: &str,
                           body: &mut dyn FnMut(&mut fmt::Formatter<'_>) -> fmt::Result|
         -> fmt::Result {
            if wrote_any {
                writeln!(f)?;
            }
            writeln!(f, "{title}")?;
            writeln!(f, "{}", "-".repeat(title.len()))?;
            body(f)?;
            wrote_any = true;
            Ok(())
        };

        let describe = |s: &SeriesSummary| {
            let kind = match s.kind {
                SeriesKind::Line => "line",
                SeriesKind::Histogram => "histogram",
            };
            format!("[{}, {kind}, {} pts]", s.pane.id(), s.points)
        };

        if !self.create.is_empty() {
            section("Overlays (CREATE)", &mut |f| {
                for (id, s) in &self.create {
                    writeln!(f, "+ {id}  {}", describe(s))?;
                }
                Ok(())
            })?;
        }
        if !self.update.is_empty() {
            section("Overlays (UPDATE)", &mut |f| {
                for (id, s) in &self.update {
                    writeln!(f, "~ {id}  {}", describe(s))?;
                }
                Ok(())
            })?;
        }
        if !self.remove.is_empty() {
            section("Overlays (REMOVE)", &mut |f| {
                for id in &self.remove {
                    writeln!(f, "- {id}")?;
                }
                Ok(())
            })?;
        }

        if !wrote_any {
            write!(f, "No changes")
        } else {
            Ok(())
        }
    }
}

/// Compares the ids currently drawn with the desired series.
pub fn make_diff<'a>(
    live: impl IntoIterator<Item = &'a String>,
    desired: &[OverlaySeries],
) -> OverlayDiff {
    let live: BTreeSet<&str> = live.into_iter().map(String::as_str).collect();
    let wanted: BTreeSet<&str> = desired.iter().map(|s| s.id.as_str()).collect();

    let mut d = OverlayDiff::default();
    for series in desired {
        let target = if live.contains(series.id.as_str()) {
            &mut d.update
        } else {
            &mut d.create
        };
        target.insert(series.id.clone(), SeriesSummary::from(series));
    }
    for id in live.difference(&wanted) {
        d.remove.insert((*id).to_string());
    }
    d
}
