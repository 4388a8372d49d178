use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use super::jsonrpc::Message;
use super::types::TransportError;

/// Header name to value, attached to every handshake or request.
pub type Headers = BTreeMap<String, String>;

/// A bidirectional JSON-RPC channel to one sandbox tool server.
///
/// Inbound frames are relayed by the transport into a bounded queue, so
/// `read` never touches the socket directly and only one task ever owns the
/// read side.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn write(&self, message: Message) -> Result<(), TransportError>;

    /// Next inbound frame. Malformed payloads come back as
    /// [`TransportError::Decode`] and leave the connection usable.
    async fn read(&self) -> Result<Message, TransportError>;

    /// Idempotent; a second call is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Builds fresh transports, once at start-up and again on every reconnect.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self) -> Result<Arc<dyn Transport>, TransportError>;

    fn kind(&self) -> TransportKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Auto,
    WebSocket,
    HttpStream,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Auto => write!(f, "auto"),
            TransportKind::WebSocket => write!(f, "websocket"),
            TransportKind::HttpStream => write!(f, "http-stream"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(TransportKind::Auto),
            "websocket" | "ws" => Ok(TransportKind::WebSocket),
            "http-stream" | "http" | "streamable-http" => Ok(TransportKind::HttpStream),
            other => Err(format!(
                "unknown transport '{}', expected auto, websocket or http-stream",
                other
            )),
        }
    }
}

fn parse_url(url: &str) -> Result<Url, TransportError> {
    Url::parse(url).map_err(|e| TransportError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

fn swap_scheme(url: &str, scheme: &str) -> Result<Url, TransportError> {
    let mut parsed = parse_url(url)?;
    parsed
        .set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: format!("cannot switch scheme to {}", scheme),
        })?;
    Ok(parsed)
}

/// `http`/`https` become `ws`/`wss`; WebSocket URLs pass through.
pub fn websocket_url(url: &str) -> Result<Url, TransportError> {
    let parsed = parse_url(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        "http" => swap_scheme(url, "ws"),
        "https" => swap_scheme(url, "wss"),
        other => Err(TransportError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// `ws`/`wss` become `http`/`https`; HTTP URLs pass through.
pub fn http_url(url: &str) -> Result<Url, TransportError> {
    let parsed = parse_url(url)?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        "ws" => swap_scheme(url, "http"),
        "wss" => swap_scheme(url, "https"),
        other => Err(TransportError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// Appends `suffix` to the URL path, keeping a single separator.
pub fn join_path(mut url: Url, suffix: &str) -> Url {
    let path = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        suffix.trim_start_matches('/')
    );
    url.set_path(&path);
    url
}

pub fn header_map(headers: &Headers) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| TransportError::InvalidUrl {
            url: String::new(),
            reason: format!("invalid header name '{}': {}", key, e),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| TransportError::InvalidUrl {
            url: String::new(),
            reason: format!("invalid value for header '{}': {}", key, e),
        })?;
        map.insert(name, value);
    }
    Ok(map)
}
