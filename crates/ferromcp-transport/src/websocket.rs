//! WebSocket transport.
//!
//! The `mcp` subprotocol must be negotiated during the opening handshake,
//! frames are text-only (one JSON-RPC message per frame), and writes are
//! serialised through a mutex to respect the protocol's single-writer rule.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use ferromcp_protocol::{Error, JsonRpcMessage, Result};

use crate::Transport;

/// The MCP WebSocket subprotocol token.
pub const MCP_SUBPROTOCOL: &str = "mcp";

/// WebSocket transport over any upgraded stream.
pub struct WebSocketTransport<S> {
    writer: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    fn from_stream(stream: WebSocketStream<S>) -> Self {
        let (writer, reader) = stream.split();
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        }
    }
}

impl WebSocketTransport<MaybeTlsStream<TcpStream>> {
    /// Dial a WebSocket MCP server, negotiating the `mcp` subprotocol.
    pub async fn connect(url: &str) -> Result<Self> {
        let mut request = tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(url)
            .map_err(|e| Error::TransportFatal(format!("invalid websocket url: {e}")))?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(MCP_SUBPROTOCOL),
        );

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| Error::TransportFatal(format!("websocket handshake failed: {e}")))?;

        let negotiated = response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok());
        if negotiated != Some(MCP_SUBPROTOCOL) {
            return Err(Error::TransportFatal(
                "server did not negotiate the mcp subprotocol".to_string(),
            ));
        }

        debug!(url, "websocket connected");
        Ok(Self::from_stream(stream))
    }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let text = message.encode()?;
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Transport(format!("websocket write failed: {e}")))
    }

    async fn receive(&self) -> Result<Option<JsonRpcMessage>> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    return JsonRpcMessage::decode(text.as_bytes()).map(Some);
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!("binary frame on mcp websocket; closing");
                    drop(reader);
                    let _ = self.close().await;
                    return Err(Error::TransportFatal(
                        "unexpected websocket message type".to_string(),
                    ));
                }
                // Control frames are handled by tungstenite; skip them here.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => {
                    return Err(Error::Transport(format!("websocket read failed: {e}")));
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        // Peer may already be gone; a failed close handshake is not an error.
        let _ = writer.send(Message::Close(None)).await;
        let _ = writer.close().await;
        Ok(())
    }
}

/// Accepts WebSocket MCP connections on a TCP listener.
pub struct WebSocketServer {
    listener: TcpListener,
}

impl WebSocketServer {
    /// Bind to `addr`.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::TransportFatal(format!("websocket bind failed: {e}")))?;
        Ok(Self { listener })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::Transport(e.to_string()))
    }

    /// Accept the next connection.
    ///
    /// Handshakes that do not offer the `mcp` subprotocol are rejected with
    /// `400 Bad Request` and the error is surfaced to the acceptor.
    pub async fn accept(&self) -> Result<WebSocketTransport<TcpStream>> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::Transport(format!("accept failed: {e}")))?;

        let negotiate = |request: &Request, mut response: Response| {
            let offered = request
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(',').any(|p| p.trim() == MCP_SUBPROTOCOL))
                .unwrap_or(false);
            if offered {
                response.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    HeaderValue::from_static(MCP_SUBPROTOCOL),
                );
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some("mcp subprotocol required".into()));
                *rejection.status_mut() = StatusCode::BAD_REQUEST;
                Err(rejection)
            }
        };

        let stream = accept_hdr_async(stream, negotiate)
            .await
            .map_err(|e| Error::Transport(format!("websocket upgrade failed: {e}")))?;

        debug!(%peer, "websocket accepted");
        Ok(WebSocketTransport::from_stream(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferromcp_protocol::jsonrpc::{JsonRpcNotification, JsonRpcRequest};
    use ferromcp_protocol::RequestId;

    async fn connected_pair() -> (WebSocketTransport<MaybeTlsStream<TcpStream>>, WebSocketTransport<TcpStream>)
    {
        let server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let accept = tokio::spawn(async move { server.accept().await.unwrap() });
        let client = WebSocketTransport::connect(&format!("ws://{addr}"))
            .await
            .unwrap();
        (client, accept.await.unwrap())
    }

    #[tokio::test]
    async fn text_frames_carry_messages_both_ways() {
        let (client, server) = connected_pair().await;

        client
            .send(JsonRpcRequest::new("ping", None, RequestId::Number(1)).into())
            .await
            .unwrap();
        let at_server = server.receive().await.unwrap().unwrap();
        assert_eq!(at_server.method(), Some("ping"));

        server
            .send(JsonRpcNotification::new("notifications/message", None).into())
            .await
            .unwrap();
        let at_client = client.receive().await.unwrap().unwrap();
        assert_eq!(at_client.method(), Some("notifications/message"));
    }

    #[tokio::test]
    async fn concurrent_writers_are_serialised() {
        let (client, server) = connected_pair().await;
        let client = std::sync::Arc::new(client);

        let mut handles = Vec::new();
        for i in 0..16i64 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .send(JsonRpcRequest::new("ping", None, RequestId::Number(i)).into())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        for _ in 0..16 {
            let message = server.receive().await.unwrap().unwrap();
            assert_eq!(message.method(), Some("ping"));
        }
    }

    #[tokio::test]
    async fn handshake_without_subprotocol_is_rejected() {
        let server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let accept = tokio::spawn(async move { server.accept().await });

        // Plain connect_async sends no Sec-WebSocket-Protocol header.
        let result = connect_async(format!("ws://{addr}")).await;
        assert!(result.is_err());
        assert!(accept.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn clean_close_ends_the_reader() {
        let (client, server) = connected_pair().await;
        client.close().await.unwrap();
        assert!(server.receive().await.unwrap().is_none());
    }
}
