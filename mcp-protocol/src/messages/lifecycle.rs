// mcp-protocol/src/messages/lifecycle.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::CAPABILITY_FIELDS;
use crate::types::{ClientInfo, ServerCapabilities, ServerInfo};

/// Parameters for the initialize request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client_info: ClientInfo,
}

/// The parts of an initialize result the client understands.
///
/// Servers are inconsistent about this object, so it is read leniently:
/// every field is optional and anything unrecognised is ignored.
#[derive(Debug, Clone, Default)]
pub struct InitializeResult {
    pub protocol_version: Option<String>,
    pub server_info: Option<ServerInfo>,
    /// `None` when neither accepted capability field holds an object
    pub capabilities: Option<ServerCapabilities>,
}

impl InitializeResult {
    pub fn from_result(result: &Map<String, Value>) -> Self {
        let capabilities = CAPABILITY_FIELDS
            .iter()
            .filter_map(|field| result.get(*field))
            .find_map(|value| match value {
                Value::Object(tree) => Some(ServerCapabilities::from_object(tree)),
                _ => None,
            });

        Self {
            protocol_version: result
                .get("protocol_version")
                .or_else(|| result.get("protocolVersion"))
                .and_then(Value::as_str)
                .map(str::to_string),
            server_info: result
                .get("server_info")
                .or_else(|| result.get("serverInfo"))
                .and_then(|info| serde_json::from_value(info.clone()).ok()),
            capabilities,
        }
    }
}
