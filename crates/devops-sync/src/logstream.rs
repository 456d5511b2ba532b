//! Live log streaming over WebSocket.
//!
//! The [`LogChannelRegistry`] keeps at most one connection per
//! [`ChannelKey`]. A key is reserved synchronously before the first await,
//! so two concurrent `open` calls for the same key cannot both connect.
//! Every inbound text or binary frame is appended to the channel's
//! [`LogSink`], terminated by a newline. Binary payloads are decoded as
//! lossy UTF-8.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use devops_model::{EndpointAddress, EndpointId};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::TokenManager;
use crate::endpoint::Connection;
use crate::error::{SyncError, SyncResult};

/// Log stream path of a single host.
pub const LOG_STREAM_PATH: &str = "/api/v1/logs/stream";

type LogSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Identifies a log channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// The endpoint's own log.
    Endpoint(EndpointId),
    /// The log of one host behind an orchestrator.
    Host {
        /// The orchestrator.
        endpoint: EndpointId,
        /// The orchestrator host.
        host_id: String,
    },
}

impl ChannelKey {
    /// The endpoint the channel belongs to.
    #[must_use]
    pub fn endpoint(&self) -> &EndpointId {
        match self {
            Self::Endpoint(endpoint) | Self::Host { endpoint, .. } => endpoint,
        }
    }

    /// The orchestrator host, if any.
    #[must_use]
    pub fn host_id(&self) -> Option<&str> {
        match self {
            Self::Endpoint(_) => None,
            Self::Host { host_id, .. } => Some(host_id),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoint(id) => write!(f, "{id}"),
            Self::Host { endpoint, host_id } => write!(f, "{endpoint}/{host_id}"),
        }
    }
}

/// WebSocket URL of a log stream.
///
/// # Errors
///
/// Returns an error if the address cannot be turned into a URL.
pub fn log_stream_url(address: &EndpointAddress, host_id: Option<&str>) -> SyncResult<Url> {
    let path = match host_id {
        Some(host_id) => format!("/api/v1/orchestrator/hosts/{host_id}/logs/stream"),
        None => LOG_STREAM_PATH.to_string(),
    };
    Ok(address.websocket_url(&path)?)
}

/// Ensure a log line ends with exactly one added newline.
#[must_use]
pub fn terminate_line(text: &str) -> Cow<'_, str> {
    if text.ends_with('\n') {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{text}\n"))
    }
}

/// Destination of streamed log text.
pub trait LogSink: Send + Sync {
    /// Append text.
    fn append(&self, text: &str);

    /// Discard everything appended so far.
    fn clear(&self);
}

/// A sink that keeps the text in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Mutex<String>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended so far.
    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn append(&self, text: &str) {
        self.buffer.lock().push_str(text);
    }

    fn clear(&self) {
        self.buffer.lock().clear();
    }
}

struct Channel {
    id: u64,
    sink: Arc<dyn LogSink>,
    /// `None` while connecting. Dropping the sender closes the connection.
    close_tx: Option<oneshot::Sender<()>>,
}

type Channels = Arc<Mutex<HashMap<ChannelKey, Channel>>>;

/// Registry of open log channels.
pub struct LogChannelRegistry {
    tokens: TokenManager,
    connect_timeout: Duration,
    channels: Channels,
    next_id: AtomicU64,
}

impl fmt::Debug for LogChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogChannelRegistry")
            .field("connect_timeout", &self.connect_timeout)
            .field("open", &self.len())
            .finish_non_exhaustive()
    }
}

impl LogChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(tokens: TokenManager, connect_timeout: Duration) -> Self {
        Self {
            tokens,
            connect_timeout,
            channels: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a log channel and start streaming into `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ChannelAlreadyOpen`] if the key is registered or
    /// being opened, and an authentication or WebSocket error if the
    /// connection cannot be established.
    pub async fn open(
        &self,
        key: ChannelKey,
        connection: &Connection,
        url: Url,
        sink: Arc<dyn LogSink>,
    ) -> SyncResult<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut channels = self.channels.lock();
            if channels.contains_key(&key) {
                return Err(SyncError::ChannelAlreadyOpen(key));
            }
            channels.insert(
                key.clone(),
                Channel {
                    id,
                    sink: Arc::clone(&sink),
                    close_tx: None,
                },
            );
        }
        // Releases the key on error or if this future is dropped mid-connect.
        let mut reservation = Reservation {
            channels: &self.channels,
            key: key.clone(),
            id,
            armed: true,
        };

        let socket = self.connect(connection, &url).await?;

        let (close_tx, close_rx) = oneshot::channel();
        let attached = match self.channels.lock().get_mut(&key) {
            Some(channel) if channel.id == id => {
                channel.close_tx = Some(close_tx);
                true
            }
            _ => false,
        };
        reservation.armed = false;
        if !attached {
            debug!(%key, "channel closed while connecting");
            return Ok(());
        }

        info!(%key, url = %url, "log channel open");
        tokio::spawn(read_loop(
            socket,
            close_rx,
            sink,
            Arc::clone(&self.channels),
            key,
            id,
        ));
        Ok(())
    }

    /// Close a channel, clear its sink and deregister it. No-op if absent.
    pub fn close(&self, key: &ChannelKey) {
        let removed = self.channels.lock().remove(key);
        if let Some(channel) = removed {
            channel.sink.clear();
            if let Some(close_tx) = channel.close_tx {
                let _ = close_tx.send(());
            }
            info!(%key, "log channel closed");
        }
    }

    /// Close every channel of an endpoint, including per-host channels.
    pub fn close_endpoint(&self, endpoint: &EndpointId) {
        let keys: Vec<ChannelKey> = self
            .channels
            .lock()
            .keys()
            .filter(|key| key.endpoint() == endpoint)
            .cloned()
            .collect();
        for key in &keys {
            self.close(key);
        }
    }

    /// Whether a key is registered (open or connecting).
    #[must_use]
    pub fn is_open(&self, key: &ChannelKey) -> bool {
        self.channels.lock().contains_key(key)
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    /// Whether no channel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    async fn connect(&self, connection: &Connection, url: &Url) -> SyncResult<LogSocket> {
        let session = self.tokens.authorize(connection).await?;

        let mut request = url.as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&session.bearer())
            .map_err(|e| SyncError::WebSocket(format!("invalid authorization header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _response) = timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| SyncError::WebSocket(format!("connection to {url} timed out")))??;
        Ok(socket)
    }
}

/// A key held by an `open` that has not finished connecting.
struct Reservation<'a> {
    channels: &'a Mutex<HashMap<ChannelKey, Channel>>,
    key: ChannelKey,
    id: u64,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            remove_if_owner(self.channels, &self.key, self.id);
        }
    }
}

fn remove_if_owner(channels: &Mutex<HashMap<ChannelKey, Channel>>, key: &ChannelKey, id: u64) {
    let mut channels = channels.lock();
    if channels.get(key).is_some_and(|channel| channel.id == id) {
        channels.remove(key);
    }
}

async fn read_loop(
    socket: LogSocket,
    mut close_rx: oneshot::Receiver<()>,
    sink: Arc<dyn LogSink>,
    channels: Channels,
    key: ChannelKey,
    id: u64,
) {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        sink.append(&terminate_line(&text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        sink.append(&terminate_line(&String::from_utf8_lossy(&data)));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(%key, "log stream closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%key, error = %e, "log stream error");
                        break;
                    }
                    None => {
                        info!(%key, "log stream ended");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    remove_if_owner(&channels, &key, id);
}
