//! MCP client over WebSocket or streamable HTTP.

pub mod http_stream;
pub mod jsonrpc;
pub mod session;
pub mod transport;
pub mod types;
pub mod websocket;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use http_stream::HttpStreamConnector;
pub use session::Session;
pub use transport::{Connector, Headers, Transport, TransportKind};
pub use types::{
    CallToolResult, Content, Error, Implementation, Result, Tool, TransportError,
    is_connection_error_message,
};
pub use websocket::WebSocketConnector;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Key used to wrap tool arguments that are not already an object.
pub const WRAPPED_ARGUMENT_KEY: &str = "input";

/// The RPC surface the sandbox layer needs, independent of transport.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<Tool>>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<T: ToolClient + ?Sized> ToolClient for Arc<T> {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        (**self).list_tools().await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        (**self).call_tool(name, arguments).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportKind,
    pub connect_timeout: Duration,
    /// Bounds the wait for each response; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Probe `/health` before each WebSocket handshake.
    pub health_check: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Auto,
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: None,
            health_check: true,
        }
    }
}

#[derive(Debug)]
enum Slot {
    Ready(Arc<Session>),
    /// The last reconnect failed; the next call tries again.
    Failed(String),
    Closed,
}

/// MCP client holding at most one live session, rebuilt once per failed call
/// when the failure is connection-class.
#[derive(Debug)]
pub struct McpClient {
    connector: Box<dyn Connector>,
    config: ClientConfig,
    slot: Mutex<Slot>,
    reconnects: AtomicUsize,
}

impl McpClient {
    pub async fn connect(url: &str, headers: Headers, transport: TransportKind) -> Result<Self> {
        Self::with_config(
            url,
            headers,
            ClientConfig {
                transport,
                ..ClientConfig::default()
            },
        )
        .await
    }

    pub async fn with_config(url: &str, headers: Headers, config: ClientConfig) -> Result<Self> {
        let kind = match config.transport {
            TransportKind::Auto => detect_transport(url, &headers).await,
            kind => kind,
        };
        info!(%url, transport = %kind, "connecting to sandbox");
        let connector: Box<dyn Connector> = match kind {
            TransportKind::HttpStream => Box::new(HttpStreamConnector::new(url, headers)),
            _ => {
                let connector = WebSocketConnector::new(url, headers);
                if config.health_check {
                    Box::new(connector)
                } else {
                    Box::new(connector.without_health_check())
                }
            }
        };
        Self::with_connector(connector, config).await
    }

    pub async fn with_connector(connector: Box<dyn Connector>, config: ClientConfig) -> Result<Self> {
        let session = establish(connector.as_ref(), &config)
            .await
            .map_err(|e| Error::Init(Box::new(e)))?;
        Ok(Self {
            connector,
            config,
            slot: Mutex::new(Slot::Ready(Arc::new(session))),
            reconnects: AtomicUsize::new(0),
        })
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.connector.kind()
    }

    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub async fn server_info(&self) -> Option<Implementation> {
        match &*self.slot.lock().await {
            Slot::Ready(session) => session.server_info().cloned(),
            _ => None,
        }
    }

    async fn current_session(&self) -> Result<Arc<Session>> {
        match &*self.slot.lock().await {
            Slot::Ready(session) => Ok(Arc::clone(session)),
            Slot::Failed(reason) => Err(Error::Transport(TransportError::Disconnected(
                reason.clone(),
            ))),
            Slot::Closed => Err(Error::Closed),
        }
    }

    /// Replaces `stale` with a fresh session. If another caller already
    /// swapped it out, their session is reused.
    async fn reconnect(&self, stale: Option<&Arc<Session>>) -> Result<Arc<Session>> {
        let mut slot = self.slot.lock().await;
        match &*slot {
            Slot::Closed => return Err(Error::Closed),
            Slot::Ready(current) if stale.is_none_or(|s| !Arc::ptr_eq(s, current)) => {
                return Ok(Arc::clone(current));
            }
            _ => {}
        }

        let attempt = self.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
        info!(attempt, transport = %self.connector.kind(), "reconnecting");
        if let Some(stale) = stale {
            if let Err(e) = stale.close().await {
                debug!(error = %e, "closing stale session failed");
            }
        }

        match establish(self.connector.as_ref(), &self.config).await {
            Ok(session) => {
                let session = Arc::new(session);
                *slot = Slot::Ready(Arc::clone(&session));
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "reconnect failed");
                *slot = Slot::Failed(format!("reconnect failed: {}", e));
                Err(Error::ReconnectFailed(Box::new(e)))
            }
        }
    }

    /// Runs `op`; on a connection-class failure reconnects once and runs it
    /// again. The second outcome is returned as is.
    async fn with_reconnect<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        T: Send,
        F: Fn(Arc<Session>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let stale = match self.current_session().await {
            Ok(session) => match op(Arc::clone(&session)).await {
                Err(e) if e.is_connection_error() => {
                    warn!(operation, error = %e, "connection lost");
                    Some(session)
                }
                other => return other,
            },
            Err(e) if e.is_connection_error() => None,
            Err(e) => return Err(e),
        };
        let session = self.reconnect(stale.as_ref()).await?;
        op(session).await
    }
}

#[async_trait]
impl ToolClient for McpClient {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.with_reconnect("tools/list", |session| async move {
            session.list_tools().await
        })
        .await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let arguments = normalize_arguments(arguments);
        self.with_reconnect("tools/call", |session| {
            let arguments = arguments.clone();
            async move { session.call_tool(name, arguments).await }
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.slot.lock().await, Slot::Closed);
        match previous {
            Slot::Ready(session) => {
                debug!("closing MCP session");
                session.close().await
            }
            Slot::Failed(_) | Slot::Closed => Ok(()),
        }
    }
}

async fn establish(connector: &dyn Connector, config: &ClientConfig) -> Result<Session> {
    let attempt = async {
        let transport = connector.connect().await?;
        match Session::start(Arc::clone(&transport), config.request_timeout).await {
            Ok(session) => Ok(session),
            Err(e) => {
                let _ = transport.close().await;
                Err(e)
            }
        }
    };
    tokio::time::timeout(config.connect_timeout, attempt)
        .await
        .map_err(|_| Error::Timeout {
            method: "connect".to_string(),
            after: config.connect_timeout,
        })?
}

/// Tool arguments must be an object: `null` becomes `{}` and any other value
/// is wrapped under [`WRAPPED_ARGUMENT_KEY`].
pub fn normalize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::Object(_) => arguments,
        Value::Null => Value::Object(Map::new()),
        other => json!({ WRAPPED_ARGUMENT_KEY: other }),
    }
}

/// Chooses a transport by probing the server with a plain GET. A body that
/// mentions "websocket" selects WebSocket, any other answer selects
/// streamable HTTP, and a failed probe falls back to WebSocket.
pub async fn detect_transport(url: &str, headers: &Headers) -> TransportKind {
    match probe(url, headers).await {
        Ok(body) if body.to_ascii_lowercase().contains("websocket") => TransportKind::WebSocket,
        Ok(_) => TransportKind::HttpStream,
        Err(e) => {
            debug!(%url, error = %e, "transport probe failed, assuming websocket");
            TransportKind::WebSocket
        }
    }
}

async fn probe(url: &str, headers: &Headers) -> std::result::Result<String, TransportError> {
    let target = transport::http_url(url)?;
    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .default_headers(transport::header_map(headers)?)
        .build()
        .map_err(|e| TransportError::Connect {
            url: target.to_string(),
            reason: e.to_string(),
        })?;
    let response = client
        .get(target.clone())
        .send()
        .await
        .map_err(|e| TransportError::Connect {
            url: target.to_string(),
            reason: e.to_string(),
        })?;
    response
        .text()
        .await
        .map_err(|e| TransportError::Disconnected(e.to_string()))
}
