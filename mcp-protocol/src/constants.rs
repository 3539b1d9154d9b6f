// mcp-protocol/src/constants.rs

/// The protocol version announced during the handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version string carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC method names
pub mod methods {
    // Lifecycle methods
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
}

/// Result fields that may carry the server's capability tree, in order of preference
pub const CAPABILITY_FIELDS: [&str; 2] = ["capabilities", "server_capabilities"];

/// JSON-RPC error codes
pub mod error_codes {
    // Standard JSON-RPC error codes
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Raised locally when the byte channel itself fails
    pub const TRANSPORT_ERROR: i32 = -32000;
}
