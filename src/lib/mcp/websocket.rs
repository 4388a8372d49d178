use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, frame::coding::CloseCode};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, info, warn};

use super::jsonrpc::{self, Message};
use super::transport::{
    Connector, Headers, Transport, TransportKind, header_map, http_url, join_path, websocket_url,
};
use super::types::TransportError;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(45);
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Inbound frames buffered between the reader task and `read`. The reader
/// stops pulling from the socket once this many frames are waiting.
pub const INBOUND_QUEUE: usize = 10;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Inbound = Result<Message, TransportError>;

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    headers: Headers,
    health_check: bool,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, headers: Headers) -> Self {
        Self {
            url: url.into(),
            headers,
            health_check: true,
        }
    }

    /// Skips the `/health` probe before each handshake.
    pub fn without_health_check(mut self) -> Self {
        self.health_check = false;
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        if self.health_check {
            check_health(&self.url, &self.headers).await?;
        }
        let transport = WebSocketTransport::connect(&self.url, &self.headers).await?;
        Ok(Arc::new(transport))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }
}

/// Probes `<url>/health` over plain HTTP(S) with the connection headers.
pub async fn check_health(url: &str, headers: &Headers) -> Result<(), TransportError> {
    let health_url = join_path(http_url(url)?, "health");
    let client = reqwest::Client::builder()
        .timeout(HEALTH_TIMEOUT)
        .default_headers(header_map(headers)?)
        .build()
        .map_err(|e| TransportError::Health(format!("failed to build health check client: {}", e)))?;

    let response = client.get(health_url.clone()).send().await.map_err(|e| {
        TransportError::Health(format!(
            "sandbox service is not reachable at {}\n\
             Please check:\n  - The sandbox name is correct\n  - The workspace name is correct\n  \
             - Your network connection\n  - The sandbox service is running\n\nError: {}",
            health_url, e
        ))
    })?;

    let status = response.status().as_u16();
    debug!(url = %health_url, status, "health check");
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(TransportError::Health(format!(
            "authentication failed for sandbox service (status: {})\n\
             Please check your credentials",
            status
        ))),
        404 => Err(TransportError::Health(format!(
            "sandbox not found (status: 404)\nPlease check:\n  - The sandbox name '{}' exists\n  \
             - You have access to this sandbox\n  - The sandbox is running",
            sandbox_name_from_url(url)
        ))),
        _ => Err(TransportError::Health(format!(
            "sandbox service health check failed (status: {})\n\
             The service may be temporarily unavailable",
            status
        ))),
    }
}

/// The path segment after `/sandboxes/`, without any query string.
fn sandbox_name_from_url(url: &str) -> &str {
    match url.split_once("/sandboxes/") {
        Some((_, rest)) => rest.split(['?', '/']).next().unwrap_or(rest),
        None => url,
    }
}

/// A WebSocket connection with one background reader task.
pub struct WebSocketTransport {
    url: String,
    sink: Mutex<SplitSink<WsStream, tungstenite::Message>>,
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl WebSocketTransport {
    pub async fn connect(url: &str, headers: &Headers) -> Result<Self, TransportError> {
        let ws_url = websocket_url(url)?;
        let connect_err = |reason: String| TransportError::Connect {
            url: ws_url.to_string(),
            reason,
        };

        let mut request = ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_err(e.to_string()))?;
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| connect_err(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| connect_err(format!("invalid value for header '{}': {}", key, e)))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| connect_err(format!("handshake timed out after {:?}", HANDSHAKE_TIMEOUT)))?
            .map_err(|e| connect_err(e.to_string()))?;
        info!(url = %ws_url, "websocket connected");

        let (sink, stream) = stream.split();
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        let reader = tokio::spawn(read_loop(stream, tx, ws_url.to_string()));

        Ok(Self {
            url: ws_url.to_string(),
            sink: Mutex::new(sink),
            inbound: Mutex::new(rx),
            reader: std::sync::Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
        })
    }

    fn stop_reader(&self) {
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

async fn read_loop(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<Inbound>, url: String) {
    loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(url = %url, error = %e, "websocket read failed");
                let _ = tx.send(Err(TransportError::Disconnected(e.to_string()))).await;
                return;
            }
            None => {
                let _ = tx
                    .send(Err(TransportError::Disconnected("end of stream".to_string())))
                    .await;
                return;
            }
        };

        let text = match frame {
            tungstenite::Message::Text(text) => text.as_str().to_owned(),
            tungstenite::Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(e) => {
                    if tx.send(Err(TransportError::Decode(e.to_string()))).await.is_err() {
                        return;
                    }
                    continue;
                }
            },
            tungstenite::Message::Close(frame) => {
                let reason = frame
                    .map(|f| format!("closed by server ({}): {}", f.code, f.reason))
                    .unwrap_or_else(|| "closed by server".to_string());
                info!(url = %url, %reason, "websocket closed");
                let _ = tx.send(Err(TransportError::Disconnected(reason))).await;
                return;
            }
            _ => continue,
        };

        let batch = match jsonrpc::decode_frame(&text) {
            Ok(messages) => messages.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => {
                warn!(url = %url, error = %e, "dropping malformed frame");
                vec![Err(e)]
            }
        };
        for item in batch {
            if tx.send(item).await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn write(&self, message: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let text = jsonrpc::encode(&message);
        self.sink
            .lock()
            .await
            .send(tungstenite::Message::text(text))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn read(&self) -> Result<Message, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        match self.inbound.lock().await.recv().await {
            Some(item) => item,
            None => Err(TransportError::Disconnected("reader stopped".to_string())),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!(url = %self.url, "closing websocket");
        let mut sink = self.sink.lock().await;
        let result = sink
            .send(tungstenite::Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })))
            .await;
        let _ = sink.close().await;
        drop(sink);
        self.stop_reader();
        // The peer may already be gone; a failed close frame is not an error.
        if let Err(e) = result {
            debug!(url = %self.url, error = %e, "close frame not delivered");
        }
        Ok(())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
