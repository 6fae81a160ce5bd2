use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl StepStatus {
    fn rank(self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::InProgress => 1,
            StepStatus::Completed | StepStatus::Skipped => 2,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }

    /// Whether a step currently in `self` may move to `next`.
    ///
    /// Statuses only move forward. A finished step keeps its outcome, so
    /// `completed` never turns into `skipped` or back.
    pub fn can_advance_to(self, next: StepStatus) -> bool {
        if self.is_finished() {
            return self == next;
        }
        next.rank() >= self.rank()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStep {
    #[serde(alias = "stage")]
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
}

impl ProgressStep {
    pub fn new(name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            name: name.into(),
            status,
            progress: None,
            description: None,
            elapsed_ms: None,
        }
    }
}

/// Support/resistance style horizontal level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub kind: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, deserialize_with = "unit_interval")]
    pub strength: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(alias = "timeRange")]
    pub time_range: (i64, i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(alias = "timeRange")]
    pub time_range: (i64, i64),
    /// `(timestamp_ms, price)` anchor points.
    #[serde(default)]
    pub points: Vec<(i64, f64)>,
}

fn unit_interval<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) })
}
