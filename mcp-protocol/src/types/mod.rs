// mcp-protocol/src/types/mod.rs
mod capability;
mod client;
mod server;

pub use capability::*;
pub use client::*;
pub use server::*;
