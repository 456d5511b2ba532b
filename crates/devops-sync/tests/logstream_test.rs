//! Log channels against an in-process WebSocket server.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{Stack, endpoint_id, fresh_token};
use devops_model::{Credentials, EndpointAddress};
use devops_sync::logstream::log_stream_url;
use devops_sync::{ChannelKey, Connection, LogChannelRegistry, LogSink, MemorySink, SyncError};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;

// ============================================================================
// Test Helpers - Mock log server
// ============================================================================

/// Serves a fixed set of frames on every connection.
struct LogServer {
    addr: SocketAddr,
    authorization: Arc<Mutex<Option<String>>>,
}

impl LogServer {
    /// Start a server. With `hang_up` it closes each connection after the
    /// lines; otherwise it keeps it open until the client leaves.
    async fn start(hang_up: bool) -> Self {
        Self::serve(
            vec![
                Message::Text("line one".into()),
                Message::Text("line two\n".into()),
            ],
            hang_up,
        )
        .await
    }

    async fn serve(frames: Vec<Message>, hang_up: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let authorization = Arc::new(Mutex::new(None));

        let seen = Arc::clone(&authorization);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                let frames = frames.clone();
                tokio::spawn(async move {
                    let callback = move |req: &Request,
                                         resp: Response|
                          -> Result<Response, ErrorResponse> {
                        *seen.lock() = req
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(ToString::to_string);
                        Ok(resp)
                    };
                    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                        return;
                    };
                    for frame in frames {
                        let _ = ws.send(frame).await;
                    }
                    if hang_up {
                        let _ = ws.close(None).await;
                        return;
                    }
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_close() {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            addr,
            authorization,
        }
    }

    fn url(&self) -> Url {
        log_stream_url(
            &EndpointAddress::from_url(format!("http://{}", self.addr)),
            None,
        )
        .expect("url")
    }
}

fn connection(token: &str) -> Connection {
    Connection::new(
        endpoint_id("host"),
        "host",
        EndpointAddress::from_url("http://127.0.0.1:9"),
        Credentials::new(common::EMAIL, common::PASSWORD),
    )
    .with_token(token)
}

fn registry(stack: &Stack) -> LogChannelRegistry {
    LogChannelRegistry::new(stack.tokens.clone(), Duration::from_secs(5))
}

fn key() -> ChannelKey {
    ChannelKey::Endpoint(endpoint_id("host"))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition met in time");
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_lines_are_appended_with_newlines() {
    let server = LogServer::start(false).await;
    let stack = Stack::new();
    let logs = registry(&stack);
    let token = fresh_token();
    let conn = connection(&token);
    let sink = Arc::new(MemorySink::new());

    logs.open(key(), &conn, server.url(), Arc::clone(&sink) as Arc<dyn LogSink>)
        .await
        .expect("open");
    assert!(logs.is_open(&key()));

    wait_until(|| sink.contents() == "line one\nline two\n").await;
    assert_eq!(
        server.authorization.lock().clone(),
        Some(format!("Bearer {token}"))
    );
}

#[tokio::test]
async fn test_binary_frames_are_appended() {
    let server = LogServer::serve(
        vec![
            Message::Binary(b"raw bytes".to_vec()),
            Message::Binary(vec![0x6f, 0x6b, 0xff]),
            Message::Text("text".into()),
        ],
        false,
    )
    .await;
    let stack = Stack::new();
    let logs = registry(&stack);
    let conn = connection(&fresh_token());
    let sink = Arc::new(MemorySink::new());

    logs.open(key(), &conn, server.url(), Arc::clone(&sink) as Arc<dyn LogSink>)
        .await
        .expect("open");

    wait_until(|| sink.contents().ends_with("text\n")).await;
    assert_eq!(sink.contents(), "raw bytes\nok\u{fffd}\ntext\n");
}

#[tokio::test]
async fn test_duplicate_open_is_rejected() {
    let server = LogServer::start(false).await;
    let stack = Stack::new();
    let logs = registry(&stack);
    let conn = connection(&fresh_token());

    logs.open(key(), &conn, server.url(), Arc::new(MemorySink::new()))
        .await
        .expect("open");
    let err = logs
        .open(key(), &conn, server.url(), Arc::new(MemorySink::new()))
        .await
        .expect_err("duplicate");
    assert!(matches!(err, SyncError::ChannelAlreadyOpen(k) if k == key()));
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn test_close_clears_sink_and_allows_reopen() {
    let server = LogServer::start(false).await;
    let stack = Stack::new();
    let logs = registry(&stack);
    let conn = connection(&fresh_token());
    let sink = Arc::new(MemorySink::new());

    logs.open(key(), &conn, server.url(), Arc::clone(&sink) as Arc<dyn LogSink>)
        .await
        .expect("open");
    wait_until(|| sink.contents().contains("line two")).await;

    logs.close(&key());
    assert!(!logs.is_open(&key()));
    assert!(sink.contents().is_empty());

    logs.open(key(), &conn, server.url(), Arc::clone(&sink) as Arc<dyn LogSink>)
        .await
        .expect("reopen");
    wait_until(|| sink.contents() == "line one\nline two\n").await;
}

#[tokio::test]
async fn test_server_hang_up_deregisters() {
    let server = LogServer::start(true).await;
    let stack = Stack::new();
    let logs = registry(&stack);
    let conn = connection(&fresh_token());

    logs.open(key(), &conn, server.url(), Arc::new(MemorySink::new()))
        .await
        .expect("open");
    wait_until(|| !logs.is_open(&key())).await;
    assert!(logs.is_empty());
}

#[tokio::test]
async fn test_connect_failure_deregisters() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let stack = Stack::new();
    let logs = registry(&stack);
    let conn = connection(&fresh_token());
    let url = Url::parse(&format!("ws://{addr}/api/v1/logs/stream")).expect("url");

    let err = logs
        .open(key(), &conn, url, Arc::new(MemorySink::new()))
        .await
        .expect_err("refused");
    assert!(matches!(err, SyncError::WebSocket(_)));
    assert!(!logs.is_open(&key()));
}

#[tokio::test]
async fn test_abandoned_open_releases_key() {
    // Accepts TCP but never answers the WebSocket handshake.
    let silent = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = silent.local_addr().expect("addr");
    let url = Url::parse(&format!("ws://{addr}/api/v1/logs/stream")).expect("url");

    let stack = Stack::new();
    let logs = registry(&stack);
    let conn = connection(&fresh_token());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(200),
        logs.open(key(), &conn, url, Arc::new(MemorySink::new())),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(!logs.is_open(&key()));

    let server = LogServer::start(false).await;
    logs.open(key(), &conn, server.url(), Arc::new(MemorySink::new()))
        .await
        .expect("key is free again");
    drop(silent);
}

#[tokio::test]
async fn test_concurrent_open_admits_one() {
    let server = LogServer::start(false).await;
    let stack = Stack::new();
    let logs = registry(&stack);
    let conn = connection(&fresh_token());

    let (a, b) = tokio::join!(
        logs.open(key(), &conn, server.url(), Arc::new(MemorySink::new())),
        logs.open(key(), &conn, server.url(), Arc::new(MemorySink::new())),
    );
    let rejected = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(SyncError::ChannelAlreadyOpen(_))))
        .count();
    assert_eq!(rejected, 1);
    assert!(a.is_ok() || b.is_ok());
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn test_close_endpoint_closes_host_channels() {
    let server = LogServer::start(false).await;
    let stack = Stack::new();
    let logs = registry(&stack);
    let conn = connection(&fresh_token());
    let host_key = ChannelKey::Host {
        endpoint: endpoint_id("host"),
        host_id: "h1".to_string(),
    };

    logs.open(key(), &conn, server.url(), Arc::new(MemorySink::new()))
        .await
        .expect("own log");
    logs.open(host_key.clone(), &conn, server.url(), Arc::new(MemorySink::new()))
        .await
        .expect("host log");
    assert_eq!(logs.len(), 2);

    logs.close_endpoint(&endpoint_id("host"));
    assert!(logs.is_empty());
    assert!(!logs.is_open(&host_key));
}
