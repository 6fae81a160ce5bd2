//! One user-initiated analysis run, end to end.
//!
//! A run fetches candles, draws them, opens the event stream, folds every event
//! into an [`AnalysisViewState`], and when the indicators stage ends fetches
//! the requested indicators and reconciles the overlays. Every applied step is
//! published as a [`RunSnapshot`] on a `watch` channel.
//!
//! Once the view is terminal, indicator fetches still in flight are aborted and
//! their results never reach the surface.

use std::sync::Arc;

use analysis_stream::{
    event::StreamEvent,
    session::{
        SessionConfig, SessionError, SessionEvents, SessionMessage, SessionOutcome, StreamSession,
    },
    state::{AnalysisViewState, reduce},
    transport::{StreamRequest, StreamTransport},
};
use futures_util::future::join_all;
use indexmap::IndexMap;
use market_data_client::{
    models::{
        candle::CandleSeries,
        indicator::{IndicatorRequest, IndicatorSeries},
        request_params::{CandleRequest, IndicatorQuery},
        timeframe::TimeFrame,
    },
    providers::{MarketDataProvider, ProviderError},
};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{Mutex, watch},
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::overlay::{DrawingSurface, OverlayReconciler, desired_overlays};

/// Shown when the stream breaks without the backend saying why.
pub const STREAM_LOST_MESSAGE: &str = "connection to the analysis stream was lost";

#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub limit: u32,
    pub indicators: Vec<IndicatorRequest>,
}

impl RunRequest {
    fn candle_request(&self) -> CandleRequest {
        CandleRequest {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            limit: self.limit,
        }
    }

    fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            limit: self.limit,
            indicators: self.indicators.clone(),
        }
    }

    fn indicator_queries(&self) -> Vec<IndicatorQuery> {
        self.indicators
            .iter()
            .map(|indicator| IndicatorQuery {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe,
                indicator: indicator.clone(),
                limit: self.limit,
            })
            .collect()
    }

    /// Label an indicator's overlays are keyed by: its name, or name and
    /// params when the same name is requested more than once.
    fn label_for(&self, indicator: &IndicatorRequest) -> String {
        let same_name = self
            .indicators
            .iter()
            .filter(|i| i.name == indicator.name)
            .count();
        if same_name > 1 {
            indicator.to_string()
        } else {
            indicator.name.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum RunFailure {
    #[error("could not load candles: {0}")]
    CandleFetch(String),

    #[error("could not draw candles: {0}")]
    Surface(String),

    #[error("analysis stream failed: {0}")]
    Stream(String),

    #[error("analysis run stopped unexpectedly: {0}")]
    Crashed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    FetchingCandles,
    Streaming,
    Done,
    Failed(RunFailure),
    /// Stopped on request. Not a failure.
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Done | RunPhase::Failed(_) | RunPhase::Cancelled
        )
    }
}

/// Everything a UI needs to render one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub run_id: u64,
    pub phase: RunPhase,
    pub view: AnalysisViewState,
    pub candle_count: usize,
    pub overlay_ids: Vec<String>,
    /// Non-fatal messages: failed indicator fetches, dropped frames.
    pub notices: Vec<String>,
}

impl RunSnapshot {
    pub fn new(run_id: u64) -> Self {
        Self {
            run_id,
            phase: RunPhase::FetchingCandles,
            view: AnalysisViewState::new(),
            candle_count: 0,
            overlay_ids: Vec::new(),
            notices: Vec::new(),
        }
    }
}

/// Side effects an event can trigger, decided before the event is reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    FetchIndicators,
}

/// The end of the indicators stage triggers the indicator fetch, once per run.
///
/// `indicators_requested` is the run's own record of having fired already; step
/// statuses in the view are not consulted, since partial results may report them
/// ahead of the `step:end`. A skipped end does not trigger, and nothing triggers
/// after the view is terminal.
pub fn trigger_for(
    indicators_requested: bool,
    view: &AnalysisViewState,
    event: &StreamEvent,
) -> Option<Transition> {
    if indicators_requested || view.is_terminal() || !event.ends_indicators_stage() {
        return None;
    }
    match event {
        StreamEvent::StepEnd(step) if step.is_skipped() => None,
        _ => Some(Transition::FetchIndicators),
    }
}

/// Overlays drawn by one run, shared with whoever owns the surface so they can
/// be cleared even if the run never returns.
pub type SharedOverlays<H> = Arc<Mutex<OverlayReconciler<H>>>;

type IndicatorBatch = Vec<(IndicatorRequest, Result<IndicatorSeries, ProviderError>)>;

pub struct AnalysisOrchestrator {
    provider: Arc<dyn MarketDataProvider>,
    transport: Arc<dyn StreamTransport>,
    session_config: SessionConfig,
}

impl AnalysisOrchestrator {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        transport: Arc<dyn StreamTransport>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            provider,
            transport,
            session_config,
        }
    }

    /// Runs one analysis until it is done, fails, or `cancel` fires.
    ///
    /// Overlays are drawn through `overlays`, which should start empty. They stay
    /// on the surface after the run returns.
    #[instrument(skip_all, fields(run_id = run_id, symbol = %request.symbol, timeframe = %request.timeframe))]
    pub async fn run<S>(
        &self,
        run_id: u64,
        request: RunRequest,
        surface: Arc<Mutex<S>>,
        overlays: SharedOverlays<S::Handle>,
        cancel: CancellationToken,
        snapshots: watch::Sender<RunSnapshot>,
    ) -> RunSnapshot
    where
        S: DrawingSurface + Send + 'static,
    {
        let mut run = Run {
            provider: self.provider.clone(),
            request,
            surface,
            overlays,
            snapshot: RunSnapshot::new(run_id),
            snapshots,
            results: IndexMap::new(),
            indicators_requested: false,
        };
        run.publish();

        let phase = match run.load_candles(&cancel).await {
            Ok(()) => {
                let (session, events) = StreamSession::open(
                    self.transport.clone(),
                    run.request.stream_request(),
                    self.session_config.clone(),
                );
                run.snapshot.phase = RunPhase::Streaming;
                run.publish();
                let phase = run.stream(events, &cancel).await;
                session.cancel();
                session.join().await;
                phase
            }
            Err(phase) => phase,
        };

        match &phase {
            RunPhase::Failed(failure) => error!(%failure, "analysis run failed"),
            RunPhase::Cancelled => info!("analysis run cancelled"),
            _ => info!("analysis run finished"),
        }
        run.snapshot.phase = phase;
        run.publish();
        run.snapshot
    }
}

struct Run<S: DrawingSurface> {
    provider: Arc<dyn MarketDataProvider>,
    request: RunRequest,
    surface: Arc<Mutex<S>>,
    overlays: SharedOverlays<S::Handle>,
    snapshot: RunSnapshot,
    snapshots: watch::Sender<RunSnapshot>,
    /// Latest successful result per indicator label.
    results: IndexMap<String, IndicatorSeries>,
    indicators_requested: bool,
}

impl<S> Run<S>
where
    S: DrawingSurface + Send + 'static,
{
    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot.clone());
    }

    fn notice(&mut self, message: String) {
        self.snapshot.notices.push(message);
    }

    /// Fetches and draws candles. Any failure here ends the run before a stream exists.
    async fn load_candles(&mut self, cancel: &CancellationToken) -> Result<(), RunPhase> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunPhase::Cancelled),
            fetched = self.provider.fetch_candles(self.request.candle_request()) => fetched,
        };
        let candles: CandleSeries =
            fetched.map_err(|e| RunPhase::Failed(RunFailure::CandleFetch(e.to_string())))?;

        self.surface
            .lock()
            .await
            .set_candles(candles.candles())
            .map_err(|e| RunPhase::Failed(RunFailure::Surface(e.to_string())))?;

        info!(candles = candles.len(), "candles drawn");
        self.snapshot.candle_count = candles.len();
        Ok(())
    }

    async fn stream(&mut self, mut events: SessionEvents, cancel: &CancellationToken) -> RunPhase {
        let mut fetches: JoinSet<IndicatorBatch> = JoinSet::new();

        let closed = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    fetches.abort_all();
                    return RunPhase::Cancelled;
                }
                Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                    self.apply_batch(joined).await;
                }
                message = events.next() => match message {
                    Some(SessionMessage::Event(event)) => {
                        self.apply_event(event, &mut fetches);
                        if self.snapshot.view.is_terminal() && !fetches.is_empty() {
                            debug!(pending = fetches.len(), "view is terminal, dropping indicator fetches");
                            fetches.abort_all();
                        }
                    }
                    Some(SessionMessage::Malformed(dropped)) => {
                        self.notice(format!("dropped a malformed frame: {dropped}"));
                        self.publish();
                    }
                    Some(SessionMessage::Closed(outcome)) => break outcome,
                    None if cancel.is_cancelled() => {
                        fetches.abort_all();
                        return RunPhase::Cancelled;
                    }
                    None => {
                        error!("analysis stream ended without a close");
                        break SessionOutcome::Failed(SessionError::ClosedEarly);
                    }
                },
            }
        };
        // results still in flight belong to a finished narrative
        fetches.abort_all();

        match closed {
            SessionOutcome::Done => RunPhase::Done,
            SessionOutcome::Cancelled => RunPhase::Cancelled,
            SessionOutcome::Failed(err) => {
                if !matches!(err, SessionError::Remote { .. }) {
                    // surface the broken connection through the reducer like any error frame
                    let lost = StreamEvent::Error {
                        message: Some(STREAM_LOST_MESSAGE.to_string()),
                        code: None,
                    };
                    self.snapshot.view = reduce(std::mem::take(&mut self.snapshot.view), &lost);
                }
                RunPhase::Failed(RunFailure::Stream(err.to_string()))
            }
        }
    }

    fn apply_event(&mut self, event: StreamEvent, fetches: &mut JoinSet<IndicatorBatch>) {
        let trigger = trigger_for(self.indicators_requested, &self.snapshot.view, &event);
        self.snapshot.view = reduce(std::mem::take(&mut self.snapshot.view), &event);

        if trigger == Some(Transition::FetchIndicators) {
            self.indicators_requested = true;
            let queries = self.request.indicator_queries();
            if queries.is_empty() {
                debug!("indicators stage ended, nothing requested");
            } else {
                info!(count = queries.len(), "fetching indicators");
                let provider = self.provider.clone();
                fetches.spawn(fetch_indicators(provider, queries));
            }
        }
        self.publish();
    }

    /// Folds one finished batch into the results and reconciles once for all of it.
    async fn apply_batch(&mut self, joined: Result<IndicatorBatch, JoinError>) {
        if self.snapshot.view.is_terminal() {
            debug!("view is terminal, indicator results discarded");
            return;
        }
        let batch = match joined {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "indicator fetch task ended abnormally");
                self.notice(format!("indicator fetch aborted: {err}"));
                self.publish();
                return;
            }
        };

        for (indicator, result) in batch {
            let label = self.request.label_for(&indicator);
            match result {
                Ok(mut series) => {
                    series.name = label.clone();
                    self.results.insert(label, series);
                }
                Err(err) => {
                    warn!(indicator = %indicator, error = %err, "indicator fetch failed");
                    self.notice(format!("indicator {indicator} unavailable: {err}"));
                }
            }
        }

        let results: Vec<IndicatorSeries> = self.results.values().cloned().collect();
        let desired = desired_overlays(&results);
        let (reconciled, live) = {
            let mut surface = self.surface.lock().await;
            let mut overlays = self.overlays.lock().await;
            let reconciled = overlays.reconcile(&mut *surface, desired);
            let live: Vec<String> = overlays.live_ids().map(str::to_string).collect();
            (reconciled, live)
        };
        match reconciled {
            Ok(diff) => debug!(%diff, "overlays reconciled"),
            Err(err) => {
                warn!(error = %err, "overlay reconciliation failed");
                self.notice(format!("could not draw overlays: {err}"));
            }
        }
        self.snapshot.overlay_ids = live;
        self.publish();
    }
}

async fn fetch_indicators(
    provider: Arc<dyn MarketDataProvider>,
    queries: Vec<IndicatorQuery>,
) -> IndicatorBatch {
    let calls = queries.into_iter().map(|query| {
        let provider = provider.clone();
        async move {
            let indicator = query.indicator.clone();
            (indicator, provider.fetch_indicator(query).await)
        }
    });
    join_all(calls).await
}

#[cfg(test)]
mod tests {
    use analysis_stream::{
        event::{INDICATORS_STAGE, PartialResult, StepUpdate},
        model::{ProgressStep, StepStatus},
        state::reduce_all,
    };

    use super::*;

    fn end(stage: &str) -> StreamEvent {
        StreamEvent::StepEnd(StepUpdate::new(stage))
    }

    #[test]
    fn indicators_end_triggers_until_requested() {
        let view = AnalysisViewState::new();
        assert_eq!(
            trigger_for(false, &view, &end(INDICATORS_STAGE)),
            Some(Transition::FetchIndicators)
        );
        assert_eq!(trigger_for(true, &view, &end(INDICATORS_STAGE)), None);
    }

    #[test]
    fn step_reported_finished_by_a_partial_still_triggers() {
        let view = reduce_all(&[StreamEvent::ResultPartial(PartialResult {
            steps: Some(vec![ProgressStep::new(INDICATORS_STAGE, StepStatus::Completed)]),
            ..Default::default()
        })]);
        assert_eq!(
            trigger_for(false, &view, &end(INDICATORS_STAGE)),
            Some(Transition::FetchIndicators)
        );
    }

    #[test]
    fn other_events_do_not_trigger() {
        let view = AnalysisViewState::new();
        assert_eq!(trigger_for(false, &view, &end("levels")), None);
        assert_eq!(
            trigger_for(
                false,
                &view,
                &StreamEvent::StepStart(StepUpdate::new(INDICATORS_STAGE))
            ),
            None
        );

        let mut skipped = StepUpdate::new(INDICATORS_STAGE);
        skipped.status = Some("skipped".into());
        assert_eq!(trigger_for(false, &view, &StreamEvent::StepEnd(skipped)), None);
    }

    #[test]
    fn terminal_view_never_triggers() {
        let view = reduce_all(&[StreamEvent::Done {
            status: "ok".into(),
        }]);
        assert_eq!(trigger_for(false, &view, &end(INDICATORS_STAGE)), None);
    }

    #[test]
    fn duplicate_indicator_names_get_distinct_labels() {
        let request = RunRequest {
            symbol: "AAPL".into(),
            timeframe: TimeFrame::day(),
            limit: 10,
            indicators: vec![
                IndicatorRequest::new("sma").with_param("period", 20.0),
                IndicatorRequest::new("sma").with_param("period", 50.0),
                IndicatorRequest::new("rsi"),
            ],
        };
        let labels: Vec<_> = request
            .indicators
            .iter()
            .map(|i| request.label_for(i))
            .collect();
        assert_eq!(labels, ["sma:period=20", "sma:period=50", "rsi"]);
    }
}
