use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::types::TransportError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard "method not found" code, used to answer server-initiated requests.
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Success(Value),
    Error(RpcError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

/// One JSON-RPC 2.0 frame in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    pub fn request(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Message::Request(Request {
            id,
            method: method.into(),
            params: Some(params),
        })
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    pub fn error_response(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Message::Response(Response {
            id,
            payload: ResponsePayload::Error(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        })
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Message::Request(req) => {
                let mut obj = json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": req.id,
                    "method": req.method,
                });
                if let Some(params) = &req.params {
                    obj["params"] = params.clone();
                }
                obj
            }
            Message::Notification(note) => {
                let mut obj = json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "method": note.method,
                });
                if let Some(params) = &note.params {
                    obj["params"] = params.clone();
                }
                obj
            }
            Message::Response(resp) => match &resp.payload {
                ResponsePayload::Success(result) => json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": resp.id,
                    "result": result,
                }),
                ResponsePayload::Error(error) => json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": resp.id,
                    "error": error,
                }),
            },
        }
    }
}

/// Serializes a frame to its wire text.
pub fn encode(message: &Message) -> String {
    message.to_value().to_string()
}

/// Decodes one wire frame. Batches (JSON arrays) yield several messages.
pub fn decode_frame(text: &str) -> Result<Vec<Message>, TransportError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| TransportError::Decode(e.to_string()))?;
    match value {
        Value::Array(items) => items.into_iter().map(decode_value).collect(),
        other => Ok(vec![decode_value(other)?]),
    }
}

fn decode_value(value: Value) -> Result<Message, TransportError> {
    let Value::Object(mut obj) = value else {
        return Err(TransportError::Decode(
            "JSON-RPC frame is not an object".to_string(),
        ));
    };

    let id = take_id(&mut obj)?;
    let method = match obj.remove("method") {
        Some(Value::String(method)) => Some(method),
        Some(_) => {
            return Err(TransportError::Decode(
                "JSON-RPC method is not a string".to_string(),
            ));
        }
        None => None,
    };
    let params = obj.remove("params");

    match (id, method) {
        (Some(id), Some(method)) => Ok(Message::Request(Request { id, method, params })),
        (None, Some(method)) => Ok(Message::Notification(Notification { method, params })),
        (Some(id), None) => {
            let payload = match (obj.remove("result"), obj.remove("error")) {
                (Some(_), Some(_)) => {
                    return Err(TransportError::Decode(
                        "response contains both `result` and `error`".to_string(),
                    ));
                }
                (None, Some(error)) => ResponsePayload::Error(
                    serde_json::from_value(error)
                        .map_err(|e| TransportError::Decode(e.to_string()))?,
                ),
                (Some(result), None) => ResponsePayload::Success(result),
                (None, None) => ResponsePayload::Success(Value::Null),
            };
            Ok(Message::Response(Response { id, payload }))
        }
        (None, None) => Err(TransportError::Decode(
            "frame is neither a request, a notification nor a response".to_string(),
        )),
    }
}

fn take_id(obj: &mut Map<String, Value>) -> Result<Option<RequestId>, TransportError> {
    match obj.remove("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(RequestId::String(s))),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|n| Some(RequestId::Number(n)))
            .ok_or_else(|| TransportError::Decode(format!("unsupported request id {}", n))),
        Some(other) => Err(TransportError::Decode(format!(
            "unsupported request id {}",
            other
        ))),
    }
}
