mod common;

use std::{collections::HashMap, sync::Arc};

use analysis_stream::session::SessionConfig;
use chart_sync::{
    controller::AnalysisController,
    memory::MemorySurface,
    orchestrator::{AnalysisOrchestrator, RunFailure, RunPhase},
    overlay::{DrawingSurface, OverlayPoint, Pane, SeriesKind, SurfaceError},
};
use common::{
    Script, ScriptedTransport, StubProvider, done, paused, request, step, token, wait_for,
};
use market_data_client::models::candle::Candle;

fn controller<S>(transport: Arc<ScriptedTransport>, surface: S) -> AnalysisController<S>
where
    S: DrawingSurface + Send + 'static,
{
    let orchestrator = AnalysisOrchestrator::new(
        Arc::new(StubProvider::new()),
        transport,
        SessionConfig::default(),
    );
    AnalysisController::new(Arc::new(orchestrator), surface)
}

#[tokio::test]
async fn new_run_replaces_the_previous_one() {
    let (second_script, resume) = paused(&[step("step:end", "indicators")], &[done()]);
    let transport = Arc::new(ScriptedTransport::new(vec![
        Script::Frames {
            body: [step("step:end", "indicators"), token("first")].concat(),
            hold_open: true,
        },
        second_script,
    ]));
    let mut controller = controller(transport.clone(), MemorySurface::new());

    let mut first = controller.start(request(&["sma", "macd"])).await;
    let drawn = wait_for(&mut first, |s| !s.overlay_ids.is_empty()).await;
    assert_eq!(drawn.run_id, 1);
    assert_eq!(controller.surface().lock().await.series().count(), 4);

    let mut second = controller.start(request(&["rsi"])).await;
    assert_eq!(controller.active_run_id(), Some(2));
    assert_eq!(first.borrow().phase, RunPhase::Cancelled);
    assert_eq!(transport.released(), 1);
    assert_eq!(controller.surface().lock().await.removed(), 4);

    wait_for(&mut second, |s| !s.overlay_ids.is_empty()).await;
    resume.notify_one();
    let last = controller.wait().await.unwrap();
    assert_eq!(last.run_id, 2);
    assert_eq!(last.phase, RunPhase::Done);
    assert_eq!(last.overlay_ids, ["rsi:value"]);

    let surface = controller.surface();
    let surface = surface.lock().await;
    assert_eq!(surface.ids(), ["rsi:value"]);
    assert_eq!(surface.removed(), 4);
}

#[tokio::test]
async fn cancel_stops_the_run_once() {
    let transport = Arc::new(ScriptedTransport::frames(&[token("waiting")], true));
    let mut controller = controller(transport.clone(), MemorySurface::new());

    let mut rx = controller.start(request(&[])).await;
    wait_for(&mut rx, |s| s.view.narrative() == "waiting").await;

    assert!(controller.cancel());
    assert!(!controller.cancel());

    let last = controller.wait().await.unwrap();
    assert_eq!(last.phase, RunPhase::Cancelled);
    assert_eq!(last.view.narrative(), "waiting");
    assert_eq!(transport.released(), 1);
}

#[tokio::test]
async fn finished_overlays_stay_until_cleared() {
    let (script, resume) = paused(&[step("step:end", "indicators")], &[done()]);
    let transport = Arc::new(ScriptedTransport::new(vec![script]));
    let mut controller = controller(transport, MemorySurface::new());

    let mut rx = controller.start(request(&["sma"])).await;
    wait_for(&mut rx, |s| !s.overlay_ids.is_empty()).await;
    resume.notify_one();

    let last = controller.wait().await.unwrap();
    assert_eq!(last.phase, RunPhase::Done);
    assert!(!controller.cancel());
    assert_eq!(controller.surface().lock().await.ids(), ["sma:value"]);

    controller.clear().await;
    assert_eq!(controller.active_run_id(), None);
    assert!(controller.surface().lock().await.ids().is_empty());
    assert!(controller.wait().await.is_none());
}

/// A [`MemorySurface`] that panics when data for `poison` is written.
struct PanickingSurface {
    inner: MemorySurface,
    ids: HashMap<u64, String>,
    poison: &'static str,
}

impl DrawingSurface for PanickingSurface {
    type Handle = u64;

    fn set_candles(&mut self, candles: &[Candle]) -> Result<(), SurfaceError> {
        self.inner.set_candles(candles)
    }

    fn create_series(
        &mut self,
        id: &str,
        kind: SeriesKind,
        pane: Pane,
        color: &str,
    ) -> Result<u64, SurfaceError> {
        let handle = self.inner.create_series(id, kind, pane, color)?;
        self.ids.insert(handle, id.to_string());
        Ok(handle)
    }

    fn set_data(&mut self, handle: &u64, points: &[OverlayPoint]) -> Result<(), SurfaceError> {
        if self.ids.get(handle).is_some_and(|id| id == self.poison) {
            panic!("cannot draw {}", self.poison);
        }
        self.inner.set_data(handle, points)
    }

    fn remove_series(&mut self, handle: u64) -> Result<(), SurfaceError> {
        self.ids.remove(&handle);
        self.inner.remove_series(handle)
    }
}

#[tokio::test]
async fn crashed_run_is_reported_and_its_overlays_cleared() {
    let (script, _resume) = paused(&[step("step:end", "indicators")], &[done()]);
    let transport = Arc::new(ScriptedTransport::new(vec![script, Script::Refuse]));
    let surface = PanickingSurface {
        inner: MemorySurface::new(),
        ids: HashMap::new(),
        poison: "macd:hist",
    };
    let mut controller = controller(transport, surface);

    controller.start(request(&["sma", "macd"])).await;
    let last = controller.wait().await.unwrap();
    match &last.phase {
        RunPhase::Failed(RunFailure::Crashed(message)) => {
            assert!(message.contains("panic"), "{message}")
        }
        other => panic!("unexpected phase {other:?}"),
    }
    assert!(!controller.cancel());
    {
        let surface = controller.surface();
        let surface = surface.lock().await;
        assert!(surface.inner.created() >= 1);
        assert_eq!(surface.inner.removed(), 0);
    }

    controller.start(request(&[])).await;

    let surface = controller.surface();
    let surface = surface.lock().await;
    assert_eq!(surface.inner.series().count(), 0);
    assert_eq!(surface.inner.removed(), surface.inner.created());
}
