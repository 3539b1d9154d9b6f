// mcp-protocol/src/types/server.rs
use serde::{Deserialize, Serialize};

/// Information about the server, as reported in the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}
