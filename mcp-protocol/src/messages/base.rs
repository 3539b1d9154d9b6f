// mcp-protocol/src/messages/base.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::constants::JSONRPC_VERSION;

/// JSON-RPC 2.0 error structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code: {code})")]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }
}

/// Represents a JSON-RPC 2.0 message (request, response, or notification)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request that expects exactly one response
    Request {
        jsonrpc: String,
        id: Value,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },

    /// A notification (one-way message with no response)
    Notification {
        jsonrpc: String,
        method: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },

    /// A response to a request. Tried after `Notification`, since a missing
    /// id reads as `null` here.
    Response {
        jsonrpc: String,
        #[serde(default)]
        id: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<JsonRpcError>,
    },
}

impl JsonRpcMessage {
    /// Create a new request
    pub fn request(id: impl Into<Value>, method: &str, params: Option<Value>) -> Self {
        JsonRpcMessage::Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }

    /// Create a new error response
    pub fn error(id: Value, code: i32, message: &str, data: Option<Value>) -> Self {
        JsonRpcMessage::Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError::new(code, message, data)),
        }
    }

    /// Create a new notification
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        JsonRpcMessage::Notification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }

    /// The id carried by a request or response; notifications have none
    pub fn id(&self) -> Option<&Value> {
        match self {
            JsonRpcMessage::Request { id, .. } | JsonRpcMessage::Response { id, .. } => Some(id),
            JsonRpcMessage::Notification { .. } => None,
        }
    }

    /// The error object of an error response
    pub fn error_object(&self) -> Option<&JsonRpcError> {
        match self {
            JsonRpcMessage::Response { error, .. } => error.as_ref(),
            _ => None,
        }
    }

    /// Split a response into its outcome. A response carrying neither field
    /// succeeds with `Value::Null`; an error field always wins over a result.
    /// Returns `None` for requests and notifications.
    pub fn into_outcome(self) -> Option<Result<Value, JsonRpcError>> {
        match self {
            JsonRpcMessage::Response {
                error: Some(error), ..
            } => Some(Err(error)),
            JsonRpcMessage::Response { result, .. } => Some(Ok(result.unwrap_or(Value::Null))),
            _ => None,
        }
    }

    /// Serialize to the single-line wire form
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
