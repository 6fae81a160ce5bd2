//! Single-flight ownership of a drawing surface.
//!
//! At most one run draws into the surface. Starting a new run cancels the
//! previous one, waits for it to stop, and removes its overlays before the
//! new run begins with fresh state.

use std::sync::Arc;

use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    orchestrator::{
        AnalysisOrchestrator, RunFailure, RunPhase, RunRequest, RunSnapshot, SharedOverlays,
    },
    overlay::{DrawingSurface, OverlayReconciler},
};

struct ActiveRun<H> {
    run_id: u64,
    cancel: CancellationToken,
    snapshots: watch::Receiver<RunSnapshot>,
    /// Held here as well as by the run, so a run that dies still gets cleaned up.
    overlays: SharedOverlays<H>,
    /// `None` once the run has been awaited.
    task: Option<JoinHandle<RunSnapshot>>,
    last: Option<RunSnapshot>,
}

pub struct AnalysisController<S: DrawingSurface> {
    orchestrator: Arc<AnalysisOrchestrator>,
    surface: Arc<Mutex<S>>,
    active: Option<ActiveRun<S::Handle>>,
    next_run_id: u64,
}

impl<S> AnalysisController<S>
where
    S: DrawingSurface + Send + 'static,
{
    pub fn new(orchestrator: Arc<AnalysisOrchestrator>, surface: S) -> Self {
        Self {
            orchestrator,
            surface: Arc::new(Mutex::new(surface)),
            active: None,
            next_run_id: 1,
        }
    }

    pub fn surface(&self) -> Arc<Mutex<S>> {
        self.surface.clone()
    }

    pub fn active_run_id(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.run_id)
    }

    /// Starts a run, stopping any previous one first.
    ///
    /// Returns a receiver of the new run's snapshots.
    pub async fn start(&mut self, request: RunRequest) -> watch::Receiver<RunSnapshot> {
        self.retire().await;

        let run_id = self.next_run_id;
        self.next_run_id += 1;
        info!(run_id, symbol = %request.symbol, timeframe = %request.timeframe, "starting analysis run");

        let (tx, rx) = watch::channel(RunSnapshot::new(run_id));
        let cancel = CancellationToken::new();
        let overlays: SharedOverlays<S::Handle> = Arc::new(Mutex::new(OverlayReconciler::new()));
        let task = {
            let orchestrator = self.orchestrator.clone();
            let surface = self.surface.clone();
            let overlays = overlays.clone();
            let token = cancel.clone();
            tokio::spawn(async move {
                orchestrator
                    .run(run_id, request, surface, overlays, token, tx)
                    .await
            })
        };

        self.active = Some(ActiveRun {
            run_id,
            cancel,
            snapshots: rx.clone(),
            overlays,
            task: Some(task),
            last: None,
        });
        rx
    }

    /// Cancels the active run. Returns `false` if there is none still running.
    pub fn cancel(&self) -> bool {
        match &self.active {
            Some(active) if active.task.is_some() && !active.cancel.is_cancelled() => {
                active.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Waits for the active run to finish and returns its final snapshot.
    ///
    /// A run whose task died is reported as [`RunFailure::Crashed`]. Its overlays
    /// stay drawn until the next [`start`](Self::start) or [`clear`](Self::clear).
    pub async fn wait(&mut self) -> Option<RunSnapshot> {
        let active = self.active.as_mut()?;
        if let Some(task) = active.task.take() {
            let snapshot = match task.await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    error!(run_id = active.run_id, error = %err, "analysis run task failed");
                    let mut snapshot = active.snapshots.borrow().clone();
                    snapshot.phase = RunPhase::Failed(RunFailure::Crashed(err.to_string()));
                    snapshot
                }
            };
            active.last = Some(snapshot);
        }
        active
            .last
            .clone()
            .or_else(|| Some(active.snapshots.borrow().clone()))
    }

    /// Stops the active run, if any, and removes everything it drew.
    pub async fn clear(&mut self) {
        self.retire().await;
    }

    async fn retire(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.cancel.cancel();
        if let Some(task) = active.task.take() {
            if let Err(err) = task.await {
                warn!(run_id = active.run_id, error = %err, "analysis run task failed");
            }
        }

        let mut surface = self.surface.lock().await;
        let mut overlays = active.overlays.lock().await;
        match overlays.clear(&mut *surface) {
            Ok(removed) => info!(run_id = active.run_id, removed, "previous run cleared"),
            Err(err) => warn!(run_id = active.run_id, error = %err, "could not clear previous run"),
        }
    }
}

impl<S: DrawingSurface> Drop for AnalysisController<S> {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}
