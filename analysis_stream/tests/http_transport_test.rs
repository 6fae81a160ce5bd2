use std::{sync::Arc, time::Duration};

use analysis_stream::{
    session::{SessionConfig, SessionError, SessionMessage, SessionOutcome, StreamSession},
    state::{AnalysisViewState, reduce},
    transport::{HttpStreamTransport, StreamRequest, StreamTransport, TransportError},
};
use market_data_client::models::indicator::IndicatorRequest;
use reqwest::Client;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};

/// Answers one request with `head` and then writes `parts` with a short pause
/// between them, closing the connection at the end.
async fn serve_stream(head: &'static str, parts: Vec<&'static str>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket.write_all(head.as_bytes()).await.unwrap();
        for part in parts {
            socket.write_all(part.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        String::from_utf8_lossy(&request).to_string()
    });
    (base_url, handle)
}

const SSE_HEAD: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nX-Accel-Buffering: no\r\nConnection: close\r\n\r\n";

fn request() -> StreamRequest {
    StreamRequest {
        symbol: "MSFT".into(),
        timeframe: "15m".parse().unwrap(),
        limit: 50,
        indicators: vec![IndicatorRequest::new("rsi")],
    }
}

#[tokio::test]
async fn streams_frames_split_across_writes() {
    let (base_url, server) = serve_stream(
        SSE_HEAD,
        vec![
            "event: step:start\ndata: {\"stage\":\"boot",
            "strap\"}\n\nevent: token\ndata: {\"text\":\"Hi\"}\n",
            "\nevent: done\ndata: {\"status\":\"ok\"}\n\n",
        ],
    )
    .await;
    let transport = HttpStreamTransport::new(Client::new(), &base_url, "/api/analysis/stream");

    let (session, mut events) =
        StreamSession::open(Arc::new(transport), request(), SessionConfig::default());
    let mut state = AnalysisViewState::new();
    let mut outcome = None;
    while let Some(message) = events.next().await {
        match message {
            SessionMessage::Event(event) => state = reduce(state, &event),
            SessionMessage::Malformed(dropped) => panic!("unexpected drop: {dropped}"),
            SessionMessage::Closed(closed) => {
                outcome = Some(closed);
                break;
            }
        }
    }

    assert!(matches!(outcome, Some(SessionOutcome::Done)));
    assert_eq!(state.narrative(), "Hi");
    assert_eq!(state.steps[0].name, "bootstrap");
    session.join().await;

    let raw = server.await.unwrap().to_lowercase();
    assert!(raw.starts_with("get /api/analysis/stream?symbol=msft&timeframe=15m&limit=50&indicators=rsi"));
    assert!(raw.contains("accept: text/event-stream"));
}

#[tokio::test]
async fn non_success_status_carries_body() {
    let (base_url, _server) = serve_stream(
        "HTTP/1.1 401 Unauthorized\r\nContent-Type: text/plain\r\nContent-Length: 12\r\nConnection: close\r\n\r\n",
        vec!["bad session!"],
    )
    .await;
    let transport = HttpStreamTransport::new(Client::new(), &base_url, "stream");

    let err = match transport.open(&request()).await {
        Ok(_) => panic!("expected a status error"),
        Err(err) => err,
    };
    match err {
        TransportError::Status { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad session!");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn connection_closed_mid_stream_is_closed_early() {
    let (base_url, _server) =
        serve_stream(SSE_HEAD, vec!["event: token\ndata: {\"text\":\"a\"}\n\n"]).await;
    let transport = Arc::new(HttpStreamTransport::new(Client::new(), &base_url, "stream"));

    let (session, mut events) = StreamSession::open(transport, request(), SessionConfig::default());
    let mut tokens = 0;
    let mut last = None;
    while let Some(message) = events.next().await {
        if let SessionMessage::Event(_) = &message {
            tokens += 1;
        }
        last = Some(message);
    }

    assert_eq!(tokens, 1);
    assert!(matches!(
        last,
        Some(SessionMessage::Closed(SessionOutcome::Failed(
            SessionError::ClosedEarly
        )))
    ));
    session.join().await;
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let transport = HttpStreamTransport::new(Client::new(), "http://127.0.0.1:9", "stream");
    let mut body = None;
    if let Ok(stream) = transport.open(&request()).await {
        body = Some(stream);
    }
    assert!(body.is_none());

    let (session, mut events) =
        StreamSession::open(Arc::new(transport), request(), SessionConfig::default());
    let mut last = None;
    while let Some(message) = events.next().await {
        last = Some(message);
    }
    assert!(matches!(
        last,
        Some(SessionMessage::Closed(SessionOutcome::Failed(
            SessionError::Transport(TransportError::Http(_))
        )))
    ));
    session.join().await;
}
