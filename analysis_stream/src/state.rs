//! Folding of [`StreamEvent`]s into renderable state.
//!
//! [`reduce`] is pure: it takes the previous state by value and returns the
//! next one. Nothing here performs I/O or knows about sessions; the caller
//! decides what to do with side effects such as the indicators trigger.

use std::borrow::Cow;

use serde::Serialize;

use crate::event::{FinalResult, PartialResult, StepUpdate, StreamEvent};
use crate::model::{Level, Pattern, ProgressStep, StepStatus};

/// Message shown when an `error` frame carries none.
pub const GENERIC_ERROR_MESSAGE: &str = "analysis failed";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    #[default]
    None,
    Done,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisViewState {
    pub steps: Vec<ProgressStep>,
    pub narrative_tokens: Vec<String>,
    pub final_summary: Option<String>,
    pub levels: Vec<Level>,
    pub patterns: Vec<Pattern>,
    /// Overall progress in `[0, 1]` when the backend reports one.
    pub progress: Option<f64>,
    pub last_heartbeat_ms: Option<f64>,
    pub terminal: Terminal,
    pub error_message: Option<String>,
}

impl AnalysisViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal != Terminal::None
    }

    /// The final summary once known, otherwise the tokens streamed so far.
    pub fn narrative(&self) -> Cow<'_, str> {
        match &self.final_summary {
            Some(summary) => Cow::Borrowed(summary.as_str()),
            None => Cow::Owned(self.narrative_tokens.concat()),
        }
    }

    pub fn step(&self, name: &str) -> Option<&ProgressStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Inserts or replaces a step by name, unless that would move its status backwards.
    fn upsert_step(&mut self, step: ProgressStep) {
        match self.steps.iter_mut().find(|s| s.name == step.name) {
            Some(existing) if existing.status.can_advance_to(step.status) => *existing = step,
            Some(_) => {}
            None => self.steps.push(step),
        }
    }

    fn apply_step(&mut self, update: &StepUpdate, status: StepStatus, progress: f64) {
        self.upsert_step(ProgressStep {
            name: update.stage.clone(),
            status,
            progress: Some(progress),
            description: update.description.clone(),
            elapsed_ms: update.elapsed_ms,
        });
    }

    fn apply_partial(&mut self, partial: &PartialResult) {
        if let Some(levels) = &partial.levels {
            self.levels = levels.clone();
        }
        if let Some(patterns) = &partial.patterns {
            self.patterns = patterns.clone();
        }
        if let Some(progress) = partial.progress {
            self.progress = Some(progress.clamp(0.0, 1.0));
        }
        // merged step by step, so an empty list changes nothing
        for step in partial.steps.iter().flatten() {
            self.upsert_step(step.clone());
        }
    }

    fn apply_final(&mut self, result: &FinalResult) {
        self.final_summary = Some(result.summary.clone());
        self.levels = result.levels.clone();
        self.patterns = result.patterns.clone();
    }
}

/// Applies one event. Once the state is terminal every further event is ignored.
pub fn reduce(mut state: AnalysisViewState, event: &StreamEvent) -> AnalysisViewState {
    if state.is_terminal() {
        return state;
    }

    match event {
        StreamEvent::Heartbeat { ts } => state.last_heartbeat_ms = Some(*ts),
        StreamEvent::StepStart(update) => state.apply_step(update, StepStatus::InProgress, 0.0),
        StreamEvent::StepEnd(update) => {
            let status = if update.is_skipped() {
                StepStatus::Skipped
            } else {
                StepStatus::Completed
            };
            state.apply_step(update, status, 1.0);
        }
        StreamEvent::Token { text } => state.narrative_tokens.push(text.clone()),
        StreamEvent::ResultPartial(partial) => state.apply_partial(partial),
        StreamEvent::ResultFinal(result) => state.apply_final(result),
        StreamEvent::Done { .. } => state.terminal = Terminal::Done,
        StreamEvent::Error { message, code } => {
            let message = message
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(GENERIC_ERROR_MESSAGE);
            state.error_message = Some(match code {
                Some(code) => format!("{message} ({code})"),
                None => message.to_string(),
            });
            state.terminal = Terminal::Error;
        }
    }
    state
}

/// Folds a whole event sequence starting from a fresh state.
pub fn reduce_all<'a, I>(events: I) -> AnalysisViewState
where
    I: IntoIterator<Item = &'a StreamEvent>,
{
    events.into_iter().fold(AnalysisViewState::new(), reduce)
}
