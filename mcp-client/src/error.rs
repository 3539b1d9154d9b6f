// mcp-client/src/error.rs
use std::io;
use std::path::PathBuf;

use ontomcp_protocol::{CapabilityError, JsonRpcError};
use thiserror::Error;

/// Failures a transport reports directly instead of as a synthesized reply
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server executable not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to launch {path}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("transport has not been launched")]
    NotLaunched,

    #[error("transport is closed")]
    Closed,

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by the protocol engine
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no transport is bound to the client")]
    NoTransport,

    #[error("client not initialized")]
    NotInitialized,

    #[error("client has exited")]
    Exited,

    #[error("invalid client state: {0}")]
    InvalidState(&'static str),

    /// The handshake was rejected or answered with something unusable
    #[error("initialize failed: {message}")]
    Protocol { code: Option<i32>, message: String },

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The server, or the transport on its behalf, answered with an error object
    #[error("rpc error: {0}")]
    Rpc(#[from] JsonRpcError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("failed to encode request: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ClientError {
    /// The JSON-RPC error code, for errors that carry one
    pub fn code(&self) -> Option<i32> {
        match self {
            ClientError::Rpc(error) => Some(error.code),
            ClientError::Protocol { code, .. } => *code,
            _ => None,
        }
    }
}
