// mcp-protocol/src/messages/mod.rs
pub mod base;
pub mod lifecycle;

pub use base::{JsonRpcError, JsonRpcMessage};
pub use lifecycle::*;
