// mcp-protocol/src/lib.rs
pub mod constants;
pub mod messages;
pub mod types;

// Re-export commonly used items
pub use constants::PROTOCOL_VERSION;
pub use messages::{JsonRpcError, JsonRpcMessage};
pub use types::*;
