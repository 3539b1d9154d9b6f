// mcp-client/src/transport/stream.rs
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::failure_reply;
use crate::error::TransportError;

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Streams {
    reader: Reader,
    writer: Writer,
}

/// Why a single exchange failed
enum ExchangeFailure {
    Write(io::Error),
    Closed,
    Read(io::Error),
}

impl ExchangeFailure {
    fn kind(&self) -> &'static str {
        match self {
            ExchangeFailure::Write(_) => "write",
            ExchangeFailure::Closed => "closed",
            ExchangeFailure::Read(_) => "read",
        }
    }
}

impl fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeFailure::Write(err) => write!(f, "write failed: {err}"),
            ExchangeFailure::Closed => f.write_str("stream closed before a reply was received"),
            ExchangeFailure::Read(err) => write!(f, "read failed: {err}"),
        }
    }
}

/// Transport over a pair of byte streams, one JSON message per line
#[derive(Clone)]
pub struct StreamTransport {
    streams: Arc<Mutex<Option<Streams>>>,
    owns_streams: bool,
}

impl StreamTransport {
    /// Wrap streams the caller keeps responsibility for; `close` leaves them open
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(reader, writer, false)
    }

    /// Wrap streams the transport owns; `close` shuts them down
    pub fn owning<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(reader, writer, true)
    }

    fn build<R, W>(reader: R, writer: W, owns_streams: bool) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            streams: Arc::new(Mutex::new(Some(Streams {
                reader: BufReader::new(reader),
                writer: Box::new(writer),
            }))),
            owns_streams,
        }
    }

    pub fn owns_streams(&self) -> bool {
        self.owns_streams
    }

    async fn write_record(writer: &mut Writer, message: &str) -> io::Result<()> {
        writer.write_all(message.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Read the next non-blank line. A trailing partial line counts as end of stream.
    async fn read_record(reader: &mut Reader) -> Result<String, ExchangeFailure> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .await
                .map_err(ExchangeFailure::Read)?;
            if read == 0 || !line.ends_with('\n') {
                return Err(ExchangeFailure::Closed);
            }
            let record = line.trim_end_matches(['\n', '\r']);
            if !record.trim().is_empty() {
                return Ok(record.to_string());
            }
        }
    }

    async fn exchange(streams: &mut Streams, message: &str) -> Result<String, ExchangeFailure> {
        Self::write_record(&mut streams.writer, message)
            .await
            .map_err(ExchangeFailure::Write)?;
        Self::read_record(&mut streams.reader).await
    }
}

#[async_trait]
impl super::Transport for StreamTransport {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        let mut guard = self.streams.lock().await;
        let streams = guard.as_mut().ok_or(TransportError::Closed)?;

        trace!(payload = %message, "Sending message");
        Self::write_record(&mut streams.writer, message).await?;
        Ok(())
    }

    async fn send_and_receive(&self, message: &str) -> Result<String, TransportError> {
        let mut guard = self.streams.lock().await;
        let streams = guard.as_mut().ok_or(TransportError::Closed)?;

        trace!(payload = %message, "Sending request");
        match Self::exchange(streams, message).await {
            Ok(reply) => {
                trace!(reply = %reply, "Received reply");
                Ok(reply)
            }
            Err(failure) => {
                debug!(kind = failure.kind(), "Exchange failed: {}", failure);
                Ok(failure_reply(message, failure.kind(), &failure))
            }
        }
    }

    async fn receive(&self) -> Result<String, TransportError> {
        let mut guard = self.streams.lock().await;
        let streams = guard.as_mut().ok_or(TransportError::Closed)?;

        match Self::read_record(&mut streams.reader).await {
            Ok(reply) => {
                trace!(reply = %reply, "Received message");
                Ok(reply)
            }
            Err(failure) => {
                debug!(kind = failure.kind(), "Receive failed: {}", failure);
                Ok(failure_reply("", failure.kind(), &failure))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.owns_streams {
            return Ok(());
        }

        let taken = self.streams.lock().await.take();
        if let Some(mut streams) = taken {
            if let Err(err) = streams.writer.shutdown().await {
                debug!("Ignoring error while shutting down writer: {}", err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use serde_json::Value;
    use tokio::io::{duplex, split, AsyncReadExt, DuplexStream};

    /// A transport wired to an in-memory peer the test drives by hand
    fn pair() -> (
        StreamTransport,
        BufReader<tokio::io::ReadHalf<DuplexStream>>,
        tokio::io::WriteHalf<DuplexStream>,
    ) {
        let (ours, theirs) = duplex(4096);
        let (our_read, our_write) = split(ours);
        let (their_read, their_write) = split(theirs);
        (
            StreamTransport::owning(our_read, our_write),
            BufReader::new(their_read),
            their_write,
        )
    }

    #[tokio::test]
    async fn exchanges_one_line_each_way() {
        let (transport, mut peer_in, mut peer_out) = pair();

        let peer = tokio::spawn(async move {
            let mut line = String::new();
            peer_in.read_line(&mut line).await.unwrap();
            peer_out.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\r\n").await.unwrap();
            line
        });

        let reply = transport.send_and_receive(r#"{"id":1}"#).await.unwrap();
        assert_eq!(reply, r#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
        assert_eq!(peer.await.unwrap(), "{\"id\":1}\n");
    }

    #[tokio::test]
    async fn end_of_stream_becomes_error_reply() {
        let (transport, _peer_in, mut peer_out) = pair();
        peer_out.shutdown().await.unwrap();

        let reply = transport
            .send_and_receive(r#"{"jsonrpc":"2.0","id":4,"method":"ping"}"#)
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["id"], 4);
        assert_eq!(reply["error"]["code"], -32000);
        assert_eq!(reply["error"]["data"]["kind"], "closed");
    }

    #[tokio::test]
    async fn partial_record_counts_as_closed() {
        let (transport, _peer_in, mut peer_out) = pair();
        peer_out.write_all(b"{\"jsonrpc\":").await.unwrap();
        peer_out.shutdown().await.unwrap();

        let reply = transport.send_and_receive("{}").await.unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["data"]["kind"], "closed");
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (transport, _peer_in, mut peer_out) = pair();
        peer_out.write_all(b"\n\n{\"ok\":true}\n").await.unwrap();

        let reply = transport.send_and_receive("{}").await.unwrap();
        assert_eq!(reply, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn receive_reads_without_writing() {
        let (transport, _peer_in, mut peer_out) = pair();
        peer_out.write_all(b"{\"late\":1}\n{\"late\":2}\n").await.unwrap();

        assert_eq!(transport.receive().await.unwrap(), r#"{"late":1}"#);
        assert_eq!(transport.receive().await.unwrap(), r#"{"late":2}"#);

        peer_out.shutdown().await.unwrap();
        let reply: Value = serde_json::from_str(&transport.receive().await.unwrap()).unwrap();
        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["data"]["kind"], "closed");
    }

    #[tokio::test]
    async fn send_does_not_wait_for_a_reply() {
        let (transport, mut peer_in, _peer_out) = pair();
        transport.send(r#"{"method":"initialized"}"#).await.unwrap();

        let mut line = String::new();
        peer_in.read_line(&mut line).await.unwrap();
        assert_eq!(line, "{\"method\":\"initialized\"}\n");
    }

    #[tokio::test]
    async fn owning_close_is_idempotent_and_shuts_streams() {
        let (transport, mut peer_in, _peer_out) = pair();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let mut rest = Vec::new();
        peer_in.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(matches!(transport.send("{}").await, Err(TransportError::Closed)));
        assert!(matches!(transport.send_and_receive("{}").await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn borrowed_close_leaves_streams_usable() {
        let (ours, theirs) = duplex(1024);
        let (our_read, our_write) = split(ours);
        let (their_read, mut their_write) = split(theirs);
        let transport = StreamTransport::new(our_read, our_write);
        assert!(!transport.owns_streams());

        transport.close().await.unwrap();
        their_write.write_all(b"{\"still\":\"open\"}\n").await.unwrap();
        assert_eq!(transport.send_and_receive("{}").await.unwrap(), r#"{"still":"open"}"#);
        drop(their_read);
    }
}
