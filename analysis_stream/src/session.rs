//! One live stream connection.
//!
//! [`StreamSession::open`] spawns a task that reads chunks from a
//! [`StreamTransport`], frames and decodes them, and delivers them in arrival
//! order over a bounded channel. The session ends exactly once, in one of
//! `closed_done`, `closed_error` or `closed_cancelled`; whichever of natural
//! completion and cancellation gets there first wins and the other is a no-op.
//! The connection is dropped by the task, once, on its way out.

use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::{DecodeError, StreamEvent};
use crate::frame::{FrameError, FrameParser, FrameResult};
use crate::state::GENERIC_ERROR_MESSAGE;
use crate::transport::{StreamRequest, StreamTransport, TransportError};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    ClosedDone,
    ClosedError,
    ClosedCancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::ClosedDone | SessionState::ClosedError | SessionState::ClosedCancelled
        )
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("backend reported an error: {message}")]
    Remote {
        message: String,
        code: Option<String>,
    },

    #[error("stream closed before completion")]
    ClosedEarly,
}

/// A frame that was dropped without affecting the session.
#[derive(Debug)]
pub enum DroppedFrame {
    Frame(FrameError),
    Decode(DecodeError),
}

impl std::fmt::Display for DroppedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DroppedFrame::Frame(err) => err.fmt(f),
            DroppedFrame::Decode(err) => err.fmt(f),
        }
    }
}

#[derive(Debug)]
pub enum SessionOutcome {
    Done,
    Failed(SessionError),
    Cancelled,
}

impl SessionOutcome {
    fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Done => SessionState::ClosedDone,
            SessionOutcome::Failed(_) => SessionState::ClosedError,
            SessionOutcome::Cancelled => SessionState::ClosedCancelled,
        }
    }
}

#[derive(Debug)]
pub enum SessionMessage {
    Event(StreamEvent),
    Malformed(DroppedFrame),
    /// Always the last message of a session that was not cancelled.
    Closed(SessionOutcome),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

struct Lifecycle {
    state: watch::Sender<SessionState>,
}

impl Lifecycle {
    /// Moves to `next` unless the session already ended. Returns whether it moved.
    fn advance(&self, next: SessionState) -> bool {
        let moved = self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if moved {
            debug!(state = ?next, "session state");
        }
        moved
    }
}

/// Cheap, cloneable view of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    lifecycle: Arc<Lifecycle>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Cancels the session. Returns `false` if it had already ended.
    pub fn cancel(&self) -> bool {
        let won = self.lifecycle.advance(SessionState::ClosedCancelled);
        if won {
            info!("session cancelled");
            self.cancel.cancel();
        }
        won
    }

    /// Waits until the session reaches a terminal state and returns it.
    pub async fn closed(&self) -> SessionState {
        let mut state = self.state.clone();
        let reached = match state.wait_for(|s| s.is_terminal()).await {
            Ok(s) => Some(*s),
            // the sender lives in `self.lifecycle`, so this cannot close first
            Err(_) => None,
        };
        reached.unwrap_or_else(|| *state.borrow())
    }

    /// Resolves once the session is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

pub struct StreamSession {
    handle: SessionHandle,
    task: Option<JoinHandle<()>>,
}

/// Receiving side of a session.
pub struct SessionEvents {
    rx: mpsc::Receiver<SessionMessage>,
    cancel: CancellationToken,
}

impl SessionEvents {
    /// Next message in arrival order, or `None` once the session is cancelled
    /// or has delivered everything. Buffered messages are discarded on cancel.
    pub async fn next(&mut self) -> Option<SessionMessage> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            message = self.rx.recv() => message,
        }
    }
}

impl StreamSession {
    /// Starts a session on the current tokio runtime.
    pub fn open(
        transport: Arc<dyn StreamTransport>,
        request: StreamRequest,
        config: SessionConfig,
    ) -> (Self, SessionEvents) {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let lifecycle = Arc::new(Lifecycle { state: state_tx });
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));

        lifecycle.advance(SessionState::Connecting);
        info!(symbol = %request.symbol, timeframe = %request.timeframe, "opening analysis stream");

        let pump = Pump {
            tx,
            cancel: cancel.clone(),
            lifecycle: lifecycle.clone(),
        };
        let task = tokio::spawn(async move {
            let outcome = pump.run(transport.as_ref(), &request).await;
            pump.settle(outcome).await;
        });

        let session = StreamSession {
            handle: SessionHandle {
                lifecycle,
                state: state_rx,
                cancel: cancel.clone(),
            },
            task: Some(task),
        };
        (session, SessionEvents { rx, cancel })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    pub async fn closed(&self) -> SessionState {
        self.handle.closed().await
    }

    /// Waits for the session task to exit.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "session task ended abnormally");
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.handle.cancel();
        // a task blocked delivering its final message must still exit
        self.handle.cancel.cancel();
    }
}

struct Pump {
    tx: mpsc::Sender<SessionMessage>,
    cancel: CancellationToken,
    lifecycle: Arc<Lifecycle>,
}

impl Pump {
    async fn run(&self, transport: &dyn StreamTransport, request: &StreamRequest) -> SessionOutcome {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return SessionOutcome::Cancelled,
            opened = transport.open(request) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => return SessionOutcome::Failed(err.into()),
        };

        let mut parser = FrameParser::new();
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break SessionOutcome::Cancelled,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    self.lifecycle.advance(SessionState::Open);
                    if let Some(outcome) = self.dispatch_all(parser.push(&chunk)).await {
                        break outcome;
                    }
                }
                Some(Err(err)) => break SessionOutcome::Failed(err.into()),
                None => {
                    if parser.pending() > 0 {
                        debug!(bytes = parser.pending(), "flushing trailing frame");
                    }
                    break self
                        .dispatch_all(parser.finish())
                        .await
                        .unwrap_or(SessionOutcome::Failed(SessionError::ClosedEarly));
                }
            }
        };

        drop(stream);
        debug!("stream connection released");
        outcome
    }

    /// Delivers frames in order, stopping at the first terminal one.
    async fn dispatch_all(
        &self,
        frames: impl IntoIterator<Item = FrameResult>,
    ) -> Option<SessionOutcome> {
        for item in frames {
            if let Some(outcome) = self.dispatch(item).await {
                return Some(outcome);
            }
        }
        None
    }

    async fn dispatch(&self, item: FrameResult) -> Option<SessionOutcome> {
        let frame = match item {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping malformed frame");
                return self
                    .deliver(SessionMessage::Malformed(DroppedFrame::Frame(err)))
                    .await
                    .err();
            }
        };

        let event = match StreamEvent::decode(&frame) {
            Ok(event) => event,
            Err(err) => {
                warn!(event = %frame.event, error = %err, "dropping undecodable frame");
                return self
                    .deliver(SessionMessage::Malformed(DroppedFrame::Decode(err)))
                    .await
                    .err();
            }
        };

        debug!(event = event.name(), "frame");
        let terminal = match &event {
            StreamEvent::Done { .. } => Some(SessionOutcome::Done),
            StreamEvent::Error { message, code } => {
                Some(SessionOutcome::Failed(SessionError::Remote {
                    message: message
                        .clone()
                        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string()),
                    code: code.clone(),
                }))
            }
            _ => None,
        };
        self.deliver(SessionMessage::Event(event))
            .await
            .err()
            .or(terminal)
    }

    /// Sends one message unless the session is cancelled or nobody listens.
    async fn deliver(&self, message: SessionMessage) -> Result<(), SessionOutcome> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionOutcome::Cancelled),
            sent = self.tx.send(message) => sent.map_err(|_| SessionOutcome::Cancelled),
        }
    }

    async fn settle(&self, outcome: SessionOutcome) {
        let state = outcome.state();
        if !self.lifecycle.advance(state) {
            return;
        }
        match &outcome {
            SessionOutcome::Failed(err) => warn!(error = %err, "analysis stream failed"),
            _ => info!(state = ?state, "analysis stream closed"),
        }
        let _ = self.deliver(SessionMessage::Closed(outcome)).await;
    }
}
