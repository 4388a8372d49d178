use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};
use url::Url;

use super::jsonrpc::{self, Message};
use super::transport::{
    Connector, Headers, Transport, TransportKind, header_map, http_url, join_path,
};
use super::types::TransportError;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";
pub const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(200);
const INBOUND_QUEUE: usize = 64;
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

type Inbound = Result<Message, TransportError>;

/// `<url>/mcp`, unless the path already ends there.
pub fn endpoint_url(url: &str) -> Result<Url, TransportError> {
    let parsed = http_url(url)?;
    if parsed.path().trim_end_matches('/').ends_with("/mcp") {
        Ok(parsed)
    } else {
        Ok(join_path(parsed, "mcp"))
    }
}

#[derive(Debug, Clone)]
pub struct HttpStreamConnector {
    url: String,
    headers: Headers,
}

impl HttpStreamConnector {
    pub fn new(url: impl Into<String>, headers: Headers) -> Self {
        Self {
            url: url.into(),
            headers,
        }
    }
}

#[async_trait]
impl Connector for HttpStreamConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(HttpStreamTransport::new(&self.url, &self.headers)?))
    }

    fn kind(&self) -> TransportKind {
        TransportKind::HttpStream
    }
}

/// MCP streamable HTTP: every outbound frame is a POST; responses come back
/// either as a JSON body or as a server-sent event stream and are queued for
/// `read`.
#[derive(Debug)]
pub struct HttpStreamTransport {
    client: reqwest::Client,
    endpoint: Url,
    session_id: std::sync::Mutex<Option<String>>,
    tx: mpsc::Sender<Inbound>,
    rx: Mutex<mpsc::Receiver<Inbound>>,
    closed: AtomicBool,
}

impl HttpStreamTransport {
    pub fn new(url: &str, headers: &Headers) -> Result<Self, TransportError> {
        let endpoint = endpoint_url(url)?;
        // Connection headers ride on every request through the client defaults.
        let client = reqwest::Client::builder()
            .default_headers(header_map(headers)?)
            .build()
            .map_err(|e| TransportError::Connect {
                url: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        Ok(Self {
            client,
            endpoint,
            session_id: std::sync::Mutex::new(None),
            tx,
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn set_session_id(&self, id: String) {
        *self
            .session_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(id);
    }

    async fn post(&self, body: String) -> Result<reqwest::Response, TransportError> {
        let session = self.session_id();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .client
                .post(self.endpoint.clone())
                .header(ACCEPT, ACCEPT_BOTH)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(id) = &session {
                request = request.header(SESSION_HEADER, id.as_str());
            }

            match request.send().await {
                Ok(response) => return Ok(response),
                // Only failures before the request left the client are safe to repeat.
                Err(e) if e.is_connect() && attempt < MAX_RETRIES => {
                    debug!(url = %self.endpoint, attempt, error = %e, "retrying request");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(e) => {
                    return Err(if e.is_timeout() {
                        TransportError::Disconnected(format!("i/o timeout: {}", e))
                    } else {
                        TransportError::Connect {
                            url: self.endpoint.to_string(),
                            reason: e.to_string(),
                        }
                    });
                }
            }
        }
    }

    async fn enqueue(&self, frames: Vec<Message>) {
        for frame in frames {
            if self.tx.send(Ok(frame)).await.is_err() {
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for HttpStreamTransport {
    async fn write(&self, message: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let had_session = self.session_id().is_some();
        let response = self.post(jsonrpc::encode(&message)).await?;

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.set_session_id(id.to_string());
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND && had_session {
            return Err(TransportError::SessionNotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                url: self.endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Disconnected(e.to_string()))?;

        let payloads = if is_event_stream {
            parse_sse(&body)
        } else if body.trim().is_empty() {
            Vec::new()
        } else {
            vec![body]
        };
        for payload in payloads {
            match jsonrpc::decode_frame(&payload) {
                Ok(frames) => self.enqueue(frames).await,
                Err(e) => {
                    warn!(url = %self.endpoint, error = %e, "dropping malformed response");
                    let _ = self.tx.send(Err(e)).await;
                }
            }
        }
        Ok(())
    }

    async fn read(&self) -> Result<Message, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        match self.rx.lock().await.recv().await {
            Some(item) => item,
            None => Err(TransportError::Closed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Wake a reader parked on the queue.
        let _ = self.tx.try_send(Err(TransportError::Closed));

        if let Some(id) = self.session_id() {
            let result = self
                .client
                .delete(self.endpoint.clone())
                .header(SESSION_HEADER, id)
                .timeout(Duration::from_secs(5))
                .send()
                .await;
            if let Err(e) = result {
                debug!(url = %self.endpoint, error = %e, "session delete failed");
            }
        }
        Ok(())
    }
}

/// Collects the `data:` payloads of a server-sent event stream, one entry
/// per event, multi-line data joined with `\n`.
pub fn parse_sse(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut data: Vec<&str> = Vec::new();
    for line in body.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if !data.is_empty() {
                events.push(data.join("\n"));
                data.clear();
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if !data.is_empty() {
        events.push(data.join("\n"));
    }
    events
}
