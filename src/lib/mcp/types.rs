use std::time::Duration;

use lazy_static::lazy_static;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level failures raised by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to establish connection to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("{0}")]
    Health(String),
    #[error("failed to send message: {0}")]
    Write(String),
    #[error("request to {url} failed with status {status}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },
    #[error("session not found")]
    SessionNotFound,
    #[error("failed to decode message: {0}")]
    Decode(String),
    #[error("connection closed: {0}")]
    Disconnected(String),
    #[error("connection closed")]
    Closed,
    #[error("i/o timeout after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Whether the underlying link is unusable and worth rebuilding.
    pub fn is_connection_error(&self) -> bool {
        match self {
            TransportError::Connect { .. }
            | TransportError::Write(_)
            | TransportError::SessionNotFound
            | TransportError::Disconnected(_)
            | TransportError::Closed
            | TransportError::Timeout(_) => true,
            TransportError::InvalidUrl { .. }
            | TransportError::Health(_)
            | TransportError::Decode(_) => false,
            TransportError::Http { body, .. } => is_connection_error_message(body),
        }
    }
}

/// Client-level failures surfaced by [`McpClient`](super::McpClient).
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to initialize MCP client: {0}")]
    Init(Box<Error>),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("request '{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },
    #[error("failed to decode '{method}' result: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("reconnect failed: {0}")]
    ReconnectFailed(Box<Error>),
    #[error("client is closed")]
    Closed,
}

impl Error {
    /// Connection-class errors trigger the one-shot reconnect-and-retry.
    ///
    /// Typed transport failures are classified structurally. Anything that
    /// only carries text (RPC errors relayed from the server, HTTP bodies)
    /// falls back to [`is_connection_error_message`].
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Transport(err) => {
                err.is_connection_error() || is_connection_error_message(&err.to_string())
            }
            Error::Timeout { .. } | Error::ReconnectFailed(_) => true,
            Error::Rpc { message, .. } => is_connection_error_message(message),
            Error::Init(_) | Error::Decode { .. } | Error::Closed => false,
        }
    }
}

lazy_static! {
    // Substring heuristics for errors that reach us as text only. Kept in one
    // place so new wordings from server or library updates land here.
    static ref CONNECTION_ERROR_PATTERNS: RegexSet = RegexSet::new([
        r"(?i)connection closed",
        r"(?i)session not found",
        r"(?i)use of closed network connection",
        r"(?i)\beof\b",
        r"(?i)end of (file|stream)",
        r"(?i)broken pipe",
        r"(?i)hanging request",
        r"(?i)failed to reconnect",
        r"(?i)reconnect failed",
        r"(?i)connection reset",
        r"(?i)connection refused",
        r"(?i)network is unreachable",
        r"(?i)no such host",
        r"(?i)failed to lookup address",
        r"(?i)i/o timeout",
        r"(?i)deadline exceeded",
    ])
    .expect("connection error patterns are valid");
}

/// Classifies a bare error message as connection-class.
pub fn is_connection_error_message(message: &str) -> bool {
    CONNECTION_ERROR_PATTERNS.is_match(message)
}

/// Name/version pair exchanged during `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: Option<Implementation>,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListToolsPage {
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// Text of the first text block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|c| match c {
            Content::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}
