// mcp-client/src/lib.rs
pub mod client;
pub mod error;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use error::{ClientError, TransportError};
pub use transport::{ProcessTransport, StreamTransport, Transport};

pub use ontomcp_protocol as protocol;
