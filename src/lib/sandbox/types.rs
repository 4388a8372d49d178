use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::mcp;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to execute command: {0}")]
    Execute(#[source] mcp::Error),
    #[error("failed to list directory: {0}")]
    ListDirectory(#[source] mcp::Error),
    #[error(transparent)]
    Mcp(#[from] mcp::Error),
    #[error("MCP error: {0}")]
    Tool(String),
    #[error("empty response from {0}")]
    EmptyContent(&'static str),
    #[error("unexpected response format from {0}")]
    UnexpectedFormat(&'static str),
    #[error("failed to parse {tool} response: {source}")]
    Parse {
        tool: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Execute(e) | Error::ListDirectory(e) | Error::Mcp(e) => e.is_connection_error(),
            _ => false,
        }
    }
}

/// Result of `processExecute`. Only `pid` and `logs` are guaranteed; the
/// rest depends on the sandbox version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    #[serde(default, deserialize_with = "string_or_number")]
    pub pid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub logs: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct File {
    pub name: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subdirectory {
    #[serde(default)]
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Directory {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<File>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subdirectories: Vec<Subdirectory>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for pid, got {}",
            other
        ))),
    }
}
