//! HTTP+SSE client transport.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex as SyncMutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use ferromcp_protocol::{Error, JsonRpcMessage, Result};

use crate::sse::SseParser;
use crate::Transport;

/// Client-side SSE [`Transport`].
///
/// Dials the server's SSE endpoint, waits for the `endpoint` event naming
/// the message POST URL, then POSTs outbound messages there while inbound
/// traffic arrives as `message` events on the stream.
pub struct SseClientTransport {
    inner: Arc<SseClientInner>,
    incoming: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
}

struct SseClientInner {
    http: reqwest::Client,
    message_url: SyncMutex<Option<Url>>,
    closed: CancellationToken,
}

impl SseClientTransport {
    /// Connect to an SSE MCP server.
    pub async fn connect(url: &str) -> Result<Self> {
        let base = Url::parse(url)
            .map_err(|e| Error::TransportFatal(format!("invalid sse url: {e}")))?;
        let http = reqwest::Client::new();
        let response = http
            .get(base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::TransportFatal(format!("sse connect failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::TransportFatal(format!(
                "sse connect rejected with {}",
                response.status()
            )));
        }

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let inner = Arc::new(SseClientInner {
            http,
            message_url: SyncMutex::new(None),
            closed: CancellationToken::new(),
        });

        {
            let inner = inner.clone();
            tokio::spawn(async move {
                inner.read_stream(response, incoming_tx, endpoint_tx).await;
            });
        }

        let endpoint = endpoint_rx
            .await
            .map_err(|_| Error::TransportFatal("stream ended before endpoint event".into()))?;
        let message_url = base
            .join(&endpoint)
            .map_err(|e| Error::TransportFatal(format!("bad endpoint event: {e}")))?;
        debug!(%message_url, "sse endpoint discovered");
        *inner.message_url.lock() = Some(message_url);

        Ok(Self {
            inner,
            incoming: Mutex::new(incoming_rx),
        })
    }
}

impl SseClientInner {
    async fn read_stream(
        self: Arc<Self>,
        response: reqwest::Response,
        incoming_tx: mpsc::UnboundedSender<JsonRpcMessage>,
        endpoint_tx: oneshot::Sender<String>,
    ) {
        let mut endpoint_tx = Some(endpoint_tx);
        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = self.closed.cancelled() => return,
                chunk = stream.next() => chunk,
            };
            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!(error = %e, "sse stream broke");
                    return;
                }
                None => return,
            };
            for event in parser.feed(&chunk) {
                match event.event_type() {
                    "endpoint" => {
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(event.data);
                        }
                    }
                    "message" => match JsonRpcMessage::decode(event.data.as_bytes()) {
                        Ok(message) => {
                            let _ = incoming_tx.send(message);
                        }
                        Err(e) => warn!(error = %e, "undecodable sse message"),
                    },
                    other => debug!(event = other, "ignoring unknown sse event type"),
                }
            }
        }
    }
}

#[async_trait]
impl Transport for SseClientTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let url = self
            .inner
            .message_url
            .lock()
            .clone()
            .ok_or(Error::Closed)?;
        let body = message.encode()?;
        let response = self
            .inner
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("message POST failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Transport(format!("message POST answered {status}")))
        }
    }

    async fn receive(&self) -> Result<Option<JsonRpcMessage>> {
        Ok(self.incoming.lock().await.recv().await)
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.cancel();
        Ok(())
    }
}
