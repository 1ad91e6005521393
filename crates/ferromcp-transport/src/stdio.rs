//! Newline-framed JSON-RPC over byte streams (stdin/stdout and pipes).

use std::pin::Pin;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::trace;

use ferromcp_protocol::{Error, JsonRpcMessage, Result};

use crate::Transport;

type BoxedRead = Pin<Box<dyn AsyncRead + Send + Sync + 'static>>;
type BoxedWrite = Pin<Box<dyn AsyncWrite + Send + Sync + 'static>>;
type LineReader = FramedRead<BufReader<BoxedRead>, LinesCodec>;
type LineWriter = FramedWrite<BoxedWrite, LinesCodec>;

/// Newline-framed transport over a read/write stream pair.
///
/// Each line is one JSON-RPC message. [`StdioTransport::new`] wires the
/// current process's stdin/stdout (the server side of a spawned MCP server);
/// [`StdioTransport::from_raw`] accepts any stream pair, e.g. a child
/// process's stdout/stdin from the client side.
pub struct StdioTransport {
    reader: Mutex<LineReader>,
    writer: Mutex<LineWriter>,
}

impl StdioTransport {
    /// Transport over the current process's stdin/stdout.
    pub fn new() -> Self {
        Self::from_raw(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Transport over arbitrary async streams.
    ///
    /// `reader` is where peer messages arrive (e.g. a child's stdout) and
    /// `writer` is where ours go (e.g. a child's stdin).
    pub fn from_raw<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
        W: AsyncWrite + Send + Sync + 'static,
    {
        let reader: BoxedRead = Box::pin(reader);
        let writer: BoxedWrite = Box::pin(writer);
        Self {
            reader: Mutex::new(FramedRead::new(BufReader::new(reader), LinesCodec::new())),
            writer: Mutex::new(FramedWrite::new(writer, LinesCodec::new())),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let line = message.encode()?;
        trace!(len = line.len(), "stdio send");
        let mut writer = self.writer.lock().await;
        writer
            .send(line)
            .await
            .map_err(|e| Error::Transport(format!("stdio write failed: {e}")))
    }

    async fn receive(&self) -> Result<Option<JsonRpcMessage>> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    trace!(len = line.len(), "stdio receive");
                    return JsonRpcMessage::decode(line.as_bytes()).map(Some);
                }
                Some(Err(e)) => {
                    return Err(Error::Transport(format!("stdio read failed: {e}")));
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let mut writer = self.writer.lock().await;
        writer
            .get_mut()
            .shutdown()
            .await
            .map_err(|e| Error::Transport(format!("stdio close failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferromcp_protocol::jsonrpc::{JsonRpcNotification, JsonRpcRequest};
    use ferromcp_protocol::RequestId;

    fn duplex_pair() -> (StdioTransport, StdioTransport) {
        let (a_read, b_write) = tokio::io::duplex(4096);
        let (b_read, a_write) = tokio::io::duplex(4096);
        (
            StdioTransport::from_raw(a_read, a_write),
            StdioTransport::from_raw(b_read, b_write),
        )
    }

    #[tokio::test]
    async fn one_line_is_one_message() {
        let (a, b) = duplex_pair();
        a.send(JsonRpcRequest::new("ping", None, RequestId::Number(1)).into())
            .await
            .unwrap();
        a.send(JsonRpcNotification::new("notifications/initialized", None).into())
            .await
            .unwrap();

        let first = b.receive().await.unwrap().unwrap();
        assert_eq!(first.method(), Some("ping"));
        let second = b.receive().await.unwrap().unwrap();
        assert_eq!(second.method(), Some("notifications/initialized"));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (read_half, mut write_half) = tokio::io::duplex(1024);
        let transport = StdioTransport::from_raw(read_half, tokio::io::sink());
        use tokio::io::AsyncWriteExt;
        write_half
            .write_all(b"\n\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}\n")
            .await
            .unwrap();
        let message = transport.receive().await.unwrap().unwrap();
        assert_eq!(message.method(), Some("ping"));
    }

    #[tokio::test]
    async fn malformed_line_is_a_parse_error() {
        let (read_half, mut write_half) = tokio::io::duplex(1024);
        let transport = StdioTransport::from_raw(read_half, tokio::io::sink());
        use tokio::io::AsyncWriteExt;
        write_half.write_all(b"{oops\n").await.unwrap();
        let err = transport.receive().await.unwrap_err();
        assert_eq!(err.jsonrpc_code(), Some(-32700));
    }

    #[tokio::test]
    async fn eof_is_a_clean_none() {
        let (read_half, write_half) = tokio::io::duplex(64);
        drop(write_half);
        let transport = StdioTransport::from_raw(read_half, tokio::io::sink());
        assert!(transport.receive().await.unwrap().is_none());
    }
}
