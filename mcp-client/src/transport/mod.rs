// mcp-client/src/transport/mod.rs
pub mod process;
pub mod stream;

use async_trait::async_trait;
use ontomcp_protocol::constants::error_codes;
use ontomcp_protocol::JsonRpcMessage;
use serde_json::{json, Value};

use crate::error::TransportError;

/// Transport trait for exchanging line-framed MCP messages with a server
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write one message without waiting for a reply
    async fn send(&self, message: &str) -> Result<(), TransportError>;

    /// Write one message and wait for exactly one reply.
    ///
    /// Channel failures during the exchange do not surface as `Err`: they come
    /// back as a JSON-RPC error reply so callers have a single error path.
    /// `Err` is reserved for calling a transport that is not usable at all.
    async fn send_and_receive(&self, message: &str) -> Result<String, TransportError>;

    /// Wait for the next message without writing anything first.
    ///
    /// Used to skip past replies that belong to an earlier message. Failures
    /// are reported the same way as in `send_and_receive`.
    async fn receive(&self) -> Result<String, TransportError>;

    /// Release the transport's resources. Safe to call more than once.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Build the error reply a transport hands back when the channel fails mid-exchange.
///
/// The reply reuses the request's id when it can be read from `request`.
pub(crate) fn failure_reply(request: &str, kind: &str, detail: impl std::fmt::Display) -> String {
    let id = serde_json::from_str::<Value>(request)
        .ok()
        .and_then(|value| value.get("id").cloned())
        .unwrap_or(Value::Null);

    let reply = JsonRpcMessage::error(
        id,
        error_codes::TRANSPORT_ERROR,
        &format!("transport failure: {detail}"),
        Some(json!({ "kind": kind })),
    );

    // Serializing a message built from plain values cannot fail
    reply.to_line().unwrap_or_else(|_| {
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"transport failure"}}}}"#,
            error_codes::TRANSPORT_ERROR
        )
    })
}

pub use process::ProcessTransport;
pub use stream::StreamTransport;
