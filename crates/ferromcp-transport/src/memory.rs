//! In-memory pipe-pair transport for tests and in-process wiring.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use ferromcp_protocol::{Error, JsonRpcMessage, Result};

use crate::Transport;

/// One end of an in-memory message pipe.
///
/// [`InMemoryTransport::pair`] yields two connected ends; whatever one end
/// sends, the other receives, in order. Dropping or closing either end
/// cleanly terminates the peer's read loop.
pub struct InMemoryTransport {
    tx: mpsc::UnboundedSender<JsonRpcMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<JsonRpcMessage>>,
}

impl InMemoryTransport {
    /// Create a connected transport pair.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| Error::Closed)
    }

    async fn receive(&self) -> Result<Option<JsonRpcMessage>> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<()> {
        self.rx.lock().await.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferromcp_protocol::jsonrpc::JsonRpcNotification;

    #[tokio::test]
    async fn messages_cross_the_pipe_in_order() {
        let (a, b) = InMemoryTransport::pair();
        for i in 0..3 {
            a.send(JsonRpcNotification::new(format!("n/{i}"), None).into())
                .await
                .unwrap();
        }
        for i in 0..3 {
            let message = b.receive().await.unwrap().unwrap();
            assert_eq!(message.method(), Some(format!("n/{i}").as_str()));
        }
    }

    #[tokio::test]
    async fn dropping_one_end_ends_the_other() {
        let (a, b) = InMemoryTransport::pair();
        drop(a);
        assert!(b.receive().await.unwrap().is_none());
        assert!(matches!(
            b.send(JsonRpcNotification::new("x", None).into()).await,
            Err(Error::Closed)
        ));
    }
}
