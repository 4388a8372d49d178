use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::jsonrpc::{METHOD_NOT_FOUND, Message, RequestId, Response, ResponsePayload, RpcError};
use super::transport::Transport;
use super::types::{
    CallToolResult, Error, Implementation, InitializeResult, ListToolsPage, Result, Tool,
    TransportError,
};

pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const CLIENT_NAME: &str = "blsh";

/// Why a pending call ended without a result.
#[derive(Debug)]
enum Failure {
    Rpc(RpcError),
    Disconnected(String),
}

type Waiter = oneshot::Sender<std::result::Result<Value, Failure>>;

#[derive(Debug, Default)]
struct PendingState {
    waiters: HashMap<RequestId, Waiter>,
    /// Set once the dispatcher has stopped; later registrations fail fast.
    closed: Option<String>,
}

#[derive(Debug, Default)]
struct Pending(Mutex<PendingState>);

impl Pending {
    fn lock(&self) -> std::sync::MutexGuard<'_, PendingState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: RequestId, waiter: Waiter) -> std::result::Result<(), String> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(reason.clone());
        }
        state.waiters.insert(id, waiter);
        Ok(())
    }

    fn take(&self, id: &RequestId) -> Option<Waiter> {
        self.lock().waiters.remove(id)
    }

    fn fail_all(&self, reason: &str) {
        let mut state = self.lock();
        state.closed.get_or_insert_with(|| reason.to_string());
        for (_, waiter) in state.waiters.drain() {
            let _ = waiter.send(Err(Failure::Disconnected(reason.to_string())));
        }
    }
}

/// Unregisters a pending call when its caller stops waiting.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.take(&self.id);
    }
}

/// One initialized MCP session over a single transport.
#[derive(Debug)]
pub struct Session {
    transport: Arc<dyn Transport>,
    pending: Arc<Pending>,
    next_id: AtomicI64,
    dispatcher: JoinHandle<()>,
    server_info: Option<Implementation>,
    request_timeout: Option<Duration>,
}

impl Session {
    /// Spawns the dispatcher and runs the `initialize` handshake.
    pub async fn start(
        transport: Arc<dyn Transport>,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let pending = Arc::new(Pending::default());
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&transport), Arc::clone(&pending)));

        let mut session = Self {
            transport,
            pending,
            next_id: AtomicI64::new(1),
            dispatcher,
            server_info: None,
            request_timeout,
        };

        let init: InitializeResult = session
            .request_typed(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": CLIENT_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;
        debug!(
            protocol = %init.protocol_version,
            server = ?init.server_info,
            "session initialized"
        );
        session.server_info = init.server_info;
        session.notify("notifications/initialized", None).await?;
        Ok(session)
    }

    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending
            .register(id.clone(), tx)
            .map_err(|reason| Error::Transport(TransportError::Disconnected(reason)))?;
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        self.write(Message::request(id, method, params)).await?;

        let outcome = match self.request_timeout {
            Some(after) => tokio::time::timeout(after, rx)
                .await
                .map_err(|_| Error::Timeout {
                    method: method.to_string(),
                    after,
                })?,
            None => rx.await,
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Failure::Rpc(err))) => Err(Error::Rpc {
                code: err.code,
                message: err.message,
            }),
            Ok(Err(Failure::Disconnected(reason))) => {
                Err(Error::Transport(TransportError::Disconnected(reason)))
            }
            Err(_) => Err(Error::Transport(TransportError::Disconnected(
                "response channel dropped".to_string(),
            ))),
        }
    }

    async fn request_typed<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value).map_err(|source| Error::Decode {
            method: method.to_string(),
            source,
        })
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.write(Message::notification(method, params)).await
    }

    /// Sends one frame, bounded by the request timeout when one is set.
    async fn write(&self, message: Message) -> Result<()> {
        let write = self.transport.write(message);
        match self.request_timeout {
            Some(after) => tokio::time::timeout(after, write)
                .await
                .map_err(|_| TransportError::Timeout(after))??,
            None => write.await?,
        }
        Ok(())
    }

    /// Every tool, following `nextCursor` until the server stops paging.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let page: ListToolsPage = self.request_typed("tools/list", params).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next)
                }
                _ => return Ok(tools),
            }
        }
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.request_typed(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    pub async fn close(&self) -> Result<()> {
        let result = self.transport.close().await;
        self.dispatcher.abort();
        self.pending.fail_all("session closed");
        result.map_err(Error::from)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Routes inbound frames to their waiters until the transport fails.
async fn dispatch(transport: Arc<dyn Transport>, pending: Arc<Pending>) {
    let reason = loop {
        match transport.read().await {
            Ok(Message::Response(Response { id, payload })) => match pending.take(&id) {
                Some(waiter) => {
                    let result = match payload {
                        ResponsePayload::Success(value) => Ok(value),
                        ResponsePayload::Error(err) => Err(Failure::Rpc(err)),
                    };
                    let _ = waiter.send(result);
                }
                None => debug!(%id, "dropping response with no waiter"),
            },
            Ok(Message::Notification(note)) => {
                debug!(method = %note.method, "server notification");
            }
            Ok(Message::Request(req)) => {
                let reply = if req.method == "ping" {
                    Message::Response(Response {
                        id: req.id,
                        payload: ResponsePayload::Success(json!({})),
                    })
                } else {
                    debug!(method = %req.method, "rejecting server request");
                    Message::error_response(
                        req.id,
                        METHOD_NOT_FOUND,
                        format!("method '{}' not supported", req.method),
                    )
                };
                if let Err(e) = transport.write(reply).await {
                    warn!(error = %e, "failed to answer server request");
                }
            }
            Err(TransportError::Decode(reason)) => {
                warn!(%reason, "skipping undecodable frame");
            }
            Err(e) => break e.to_string(),
        }
    };
    debug!(%reason, "dispatcher stopped");
    pending.fail_all(&reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::{Mutex as AsyncMutex, mpsc};

    /// In-memory transport answering requests through a scripted handler.
    #[derive(Debug)]
    struct ScriptedTransport {
        inbound_tx: mpsc::UnboundedSender<std::result::Result<Message, TransportError>>,
        inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<std::result::Result<Message, TransportError>>>,
        respond: fn(&crate::mcp::jsonrpc::Request) -> Option<Message>,
        stall_writes: AtomicBool,
    }

    impl ScriptedTransport {
        fn new(respond: fn(&crate::mcp::jsonrpc::Request) -> Option<Message>) -> Arc<Self> {
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            Arc::new(Self {
                inbound_tx,
                inbound_rx: AsyncMutex::new(inbound_rx),
                respond,
                stall_writes: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn write(&self, message: Message) -> std::result::Result<(), TransportError> {
            if self.stall_writes.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if let Message::Request(req) = &message {
                if let Some(reply) = (self.respond)(req) {
                    let _ = self.inbound_tx.send(Ok(reply));
                }
            }
            Ok(())
        }

        async fn read(&self) -> std::result::Result<Message, TransportError> {
            match self.inbound_rx.lock().await.recv().await {
                Some(item) => item,
                None => Err(TransportError::Closed),
            }
        }

        async fn close(&self) -> std::result::Result<(), TransportError> {
            let _ = self
                .inbound_tx
                .send(Err(TransportError::Disconnected("closed".into())));
            Ok(())
        }
    }

    fn success(req: &crate::mcp::jsonrpc::Request, result: Value) -> Option<Message> {
        Some(Message::Response(Response {
            id: req.id.clone(),
            payload: ResponsePayload::Success(result),
        }))
    }

    fn server(req: &crate::mcp::jsonrpc::Request) -> Option<Message> {
        match req.method.as_str() {
            "initialize" => success(
                req,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "sandbox", "version": "1.0.0"}
                }),
            ),
            "tools/list" => {
                let cursor = req.params.as_ref().and_then(|p| p.get("cursor")).cloned();
                if cursor.is_none() {
                    success(req, json!({"tools": [{"name": "processExecute"}], "nextCursor": "2"}))
                } else {
                    success(req, json!({"tools": [{"name": "fsListDirectory"}]}))
                }
            }
            "tools/call" => Some(Message::error_response(req.id.clone(), -32602, "unknown tool")),
            // Never answered.
            _ => None,
        }
    }

    #[tokio::test]
    async fn initializes_and_pages_through_tools() {
        let session = Session::start(ScriptedTransport::new(server), None)
            .await
            .unwrap();
        assert_eq!(session.server_info().map(|i| i.name.as_str()), Some("sandbox"));

        let names: Vec<_> = session
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["processExecute", "fsListDirectory"]);
    }

    #[tokio::test]
    async fn rpc_errors_surface_with_code() {
        let session = Session::start(ScriptedTransport::new(server), None)
            .await
            .unwrap();
        let err = session.call_tool("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Rpc { code: -32602, .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn unanswered_request_times_out_and_unregisters() {
        let session = Session::start(
            ScriptedTransport::new(server),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap();
        let err = session.request("slow/method", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_connection_error());
        assert!(session.pending.lock().waiters.is_empty());
    }

    #[tokio::test]
    async fn stalled_write_times_out_and_unregisters() {
        let transport = ScriptedTransport::new(server);
        let session = Session::start(transport.clone(), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        transport.stall_writes.store(true, Ordering::SeqCst);

        let err = session.request("tools/list", json!({})).await.unwrap_err();
        assert!(
            matches!(err, Error::Transport(TransportError::Timeout(_))),
            "{:?}",
            err
        );
        assert!(err.is_connection_error());
        assert!(session.pending.lock().waiters.is_empty());

        let err = session.notify("notifications/ping", None).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn close_fails_in_flight_and_later_requests() {
        let session = Arc::new(
            Session::start(ScriptedTransport::new(server), None)
                .await
                .unwrap(),
        );
        let waiting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.request("slow/method", json!({})).await })
        };
        tokio::task::yield_now().await;
        while session.pending.lock().waiters.is_empty() {
            tokio::task::yield_now().await;
        }
        session.close().await.unwrap();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(err.is_connection_error(), "{:?}", err);
        let err = session.list_tools().await.unwrap_err();
        assert!(err.is_connection_error(), "{:?}", err);
    }
}
