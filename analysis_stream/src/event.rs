//! Typed events decoded from [`Frame`]s.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::frame::Frame;
use crate::model::{Level, Pattern, ProgressStep};

/// Name of the step whose end means indicator results are ready to fetch.
pub const INDICATORS_STAGE: &str = "indicators";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("payload of '{event}' does not match its shape: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StepUpdate {
    pub stage: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub elapsed_ms: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl StepUpdate {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            description: None,
            elapsed_ms: None,
            status: None,
            metadata: None,
        }
    }

    /// A step end reports a skip either as `status: "skipped"` or via `metadata.skipped`.
    pub fn is_skipped(&self) -> bool {
        let by_status = self
            .status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("skipped"));
        let by_metadata = self
            .metadata
            .as_ref()
            .and_then(|m| m.get("skipped"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        by_status || by_metadata
    }
}

/// Fragments of an in-progress result. Absent fields leave state untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PartialResult {
    #[serde(default)]
    pub indicators: Option<Value>,
    #[serde(default)]
    pub levels: Option<Vec<Level>>,
    #[serde(default)]
    pub patterns: Option<Vec<Pattern>>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub steps: Option<Vec<ProgressStep>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FinalResult {
    pub summary: String,
    #[serde(default)]
    pub levels: Vec<Level>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Heartbeat { ts: f64 },
    StepStart(StepUpdate),
    StepEnd(StepUpdate),
    Token { text: String },
    ResultPartial(PartialResult),
    ResultFinal(FinalResult),
    Done { status: String },
    Error {
        message: Option<String>,
        code: Option<String>,
    },
}

#[derive(Deserialize)]
struct HeartbeatPayload {
    ts: f64,
}

#[derive(Deserialize)]
struct TokenPayload {
    text: String,
}

#[derive(Deserialize)]
struct DonePayload {
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

fn payload<T: DeserializeOwned>(frame: &Frame) -> Result<T, DecodeError> {
    T::deserialize(&frame.payload).map_err(|source| DecodeError::Payload {
        event: frame.event.clone(),
        source,
    })
}

impl StreamEvent {
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        let event = match frame.event.as_str() {
            "heartbeat" => {
                let HeartbeatPayload { ts } = payload(frame)?;
                StreamEvent::Heartbeat { ts }
            }
            "step:start" => StreamEvent::StepStart(payload(frame)?),
            "step:end" => StreamEvent::StepEnd(payload(frame)?),
            "token" => {
                let TokenPayload { text } = payload(frame)?;
                StreamEvent::Token { text }
            }
            "result_partial" => StreamEvent::ResultPartial(payload(frame)?),
            "result_final" => StreamEvent::ResultFinal(payload(frame)?),
            "done" => {
                let DonePayload { status } = payload(frame)?;
                StreamEvent::Done { status }
            }
            "error" => {
                let ErrorPayload { message, code } = payload(frame)?;
                StreamEvent::Error { message, code }
            }
            other => return Err(DecodeError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Heartbeat { .. } => "heartbeat",
            StreamEvent::StepStart(_) => "step:start",
            StreamEvent::StepEnd(_) => "step:end",
            StreamEvent::Token { .. } => "token",
            StreamEvent::ResultPartial(_) => "result_partial",
            StreamEvent::ResultFinal(_) => "result_final",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    /// True for the `step:end` of the indicators stage.
    pub fn ends_indicators_stage(&self) -> bool {
        matches!(self, StreamEvent::StepEnd(step) if step.stage == INDICATORS_STAGE)
    }
}
