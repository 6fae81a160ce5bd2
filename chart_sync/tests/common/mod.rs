#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::Poll,
};

use analysis_stream::transport::{ByteStream, StreamRequest, StreamTransport, TransportError};
use async_trait::async_trait;
use chart_sync::orchestrator::{RunRequest, RunSnapshot};
use futures_util::{StreamExt, stream};
use indexmap::IndexMap;
use market_data_client::{
    models::{
        candle::{Candle, CandleSeries},
        indicator::{IndicatorRow, IndicatorSeries},
        request_params::{CandleRequest, IndicatorQuery},
        timeframe::TimeFrame,
    },
    providers::{ApiSnafu, MarketDataProvider, ProviderError},
};
use tokio::sync::{Notify, watch};

pub fn frame(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

pub fn step(event: &str, stage: &str) -> String {
    frame(event, &format!(r#"{{"stage":"{stage}"}}"#))
}

pub fn token(text: &str) -> String {
    frame("token", &format!(r#"{{"text":"{text}"}}"#))
}

pub fn done() -> String {
    frame("done", r#"{"status":"ok"}"#)
}

pub fn request(indicators: &[&str]) -> RunRequest {
    RunRequest {
        symbol: "AAPL".into(),
        timeframe: TimeFrame::day(),
        limit: 3,
        indicators: indicators.iter().map(|s| s.parse().unwrap()).collect(),
    }
}

fn candles() -> Vec<Candle> {
    (1..=3)
        .map(|i| Candle {
            timestamp_ms: i * 86_400_000,
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            volume: 1000.0,
        })
        .collect()
}

fn indicator(name: &str, fields: &[&str]) -> IndicatorSeries {
    IndicatorSeries {
        name: name.to_string(),
        rows: (1..=3)
            .map(|i| IndicatorRow {
                timestamp: i * 86_400_000,
                values: fields
                    .iter()
                    .map(|f| (f.to_string(), (i > 1).then_some(i as f64)))
                    .collect::<IndexMap<_, _>>(),
            })
            .collect(),
    }
}

/// Candles always succeed unless `fail_candles` is set. Indicators are served
/// from a fixed table; unknown names answer HTTP 500.
pub struct StubProvider {
    fail_candles: bool,
    table: HashMap<String, IndicatorSeries>,
    /// When set, indicator calls wait on it forever.
    pub gate: Option<Arc<Notify>>,
    pub candle_calls: AtomicUsize,
    pub indicator_calls: AtomicUsize,
}

impl StubProvider {
    pub fn new() -> Self {
        let table = [
            indicator("sma", &["value"]),
            indicator("bbands", &["upper", "middle", "lower"]),
            indicator("rsi", &["value"]),
            indicator("macd", &["macd", "signal", "hist"]),
        ]
        .into_iter()
        .map(|s| (s.name.clone(), s))
        .collect();
        Self {
            fail_candles: false,
            table,
            gate: None,
            candle_calls: AtomicUsize::new(0),
            indicator_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_candles() -> Self {
        Self {
            fail_candles: true,
            ..Self::new()
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::new()
        }
    }
}

#[async_trait]
impl MarketDataProvider for StubProvider {
    async fn fetch_candles(&self, req: CandleRequest) -> Result<CandleSeries, ProviderError> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_candles {
            return Err(ApiSnafu {
                status: 503u16,
                message: "candles unavailable",
            }
            .build());
        }
        Ok(CandleSeries::from_unordered(req.symbol, req.timeframe, candles()))
    }

    async fn fetch_indicator(
        &self,
        query: IndicatorQuery,
    ) -> Result<IndicatorSeries, ProviderError> {
        self.indicator_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.table.get(&query.indicator.name).cloned().ok_or_else(|| {
            ApiSnafu {
                status: 500u16,
                message: format!("no such indicator {}", query.indicator.name),
            }
            .build()
        })
    }
}

struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub enum Script {
    /// Serves the frames, then closes (or stays open when `hold_open`).
    Frames { body: String, hold_open: bool },
    /// Serves `head`, waits for `resume`, then serves `tail` and closes.
    Paused {
        head: String,
        resume: Arc<Notify>,
        tail: String,
    },
    /// The byte stream panics on first poll.
    Panic,
    Refuse,
}

/// A script that stops after `head` until the returned `Notify` fires.
pub fn paused(head: &[String], tail: &[String]) -> (Script, Arc<Notify>) {
    let resume = Arc::new(Notify::new());
    let script = Script::Paused {
        head: head.concat(),
        resume: resume.clone(),
        tail: tail.concat(),
    };
    (script, resume)
}

/// Serves one script per `open`, in order.
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    pub opened: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            opened: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn frames(frames: &[String], hold_open: bool) -> Self {
        Self::new(vec![Script::Frames {
            body: frames.concat(),
            hold_open,
        }])
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open(&self, _request: &StreamRequest) -> Result<ByteStream, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front();
        let chunks: ByteStream = match script {
            Some(Script::Frames { body, hold_open }) => {
                let chunks = stream::iter(vec![Ok(body.into_bytes())]);
                if hold_open {
                    chunks.chain(stream::pending()).boxed()
                } else {
                    chunks.boxed()
                }
            }
            Some(Script::Paused { head, resume, tail }) => stream::iter(vec![Ok(head.into_bytes())])
                .chain(stream::once(async move {
                    resume.notified().await;
                    Ok(tail.into_bytes())
                }))
                .boxed(),
            Some(Script::Panic) => stream::poll_fn(
                |_| -> Poll<Option<Result<Vec<u8>, TransportError>>> {
                    panic!("byte stream panicked")
                },
            )
            .boxed(),
            Some(Script::Refuse) | None => {
                return Err(TransportError::Status {
                    status: 502,
                    body: "bad gateway".into(),
                });
            }
        };

        let guard = ReleaseGuard(self.released.clone());
        Ok(chunks
            .map(move |chunk| {
                let _held = &guard;
                chunk
            })
            .boxed())
    }
}

/// Waits until a snapshot satisfies `pred` and returns it.
pub async fn wait_for(
    rx: &mut watch::Receiver<RunSnapshot>,
    pred: impl FnMut(&RunSnapshot) -> bool,
) -> RunSnapshot {
    let snapshot = rx.wait_for(pred).await.unwrap();
    snapshot.clone()
}
