//! In-memory link: two endpoints joined by unbounded channels. Used by
//! integration tests and single-process examples.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::link::{LinkRx, LinkTx};
use crate::message::Message;

/// Write half of an in-memory link.
pub struct MemLinkTx {
    tx: Option<mpsc::UnboundedSender<Message>>,
    label: &'static str,
}

/// Read half of an in-memory link.
pub struct MemLinkRx {
    rx: mpsc::UnboundedReceiver<Message>,
    label: &'static str,
}

/// Returns two connected endpoints; what one side sends, the other receives.
pub fn pair() -> ((MemLinkTx, MemLinkRx), (MemLinkTx, MemLinkRx)) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        (
            MemLinkTx {
                tx: Some(a_tx),
                label: "mem/a",
            },
            MemLinkRx {
                rx: a_rx,
                label: "mem/a",
            },
        ),
        (
            MemLinkTx {
                tx: Some(b_tx),
                label: "mem/b",
            },
            MemLinkRx {
                rx: b_rx,
                label: "mem/b",
            },
        ),
    )
}

#[async_trait]
impl LinkTx for MemLinkTx {
    async fn send(&mut self, msg: &Message) -> Result<(), LinkError> {
        let tx = self.tx.as_ref().ok_or(LinkError::Closed)?;
        tx.send(msg.clone()).map_err(|_| LinkError::Closed)
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        // Dropping the sender surfaces Closed on the peer's read half.
        self.tx = None;
        Ok(())
    }

    fn locator(&self) -> String {
        self.label.to_string()
    }
}

#[async_trait]
impl LinkRx for MemLinkRx {
    async fn recv(&mut self) -> Result<Message, LinkError> {
        self.rx.recv().await.ok_or(LinkError::Closed)
    }

    fn locator(&self) -> String {
        self.label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_both_ways() {
        let ((mut a_tx, mut a_rx), (mut b_tx, mut b_rx)) = pair();
        a_tx.send(&Message::KeepAlive).await.unwrap();
        assert_eq!(b_rx.recv().await.unwrap(), Message::KeepAlive);
        b_tx.send(&Message::KeepAlive).await.unwrap();
        assert_eq!(a_rx.recv().await.unwrap(), Message::KeepAlive);
    }

    #[tokio::test]
    async fn test_close_surfaces_on_peer() {
        let ((mut a_tx, _a_rx), (_b_tx, mut b_rx)) = pair();
        a_tx.close().await.unwrap();
        assert!(matches!(b_rx.recv().await, Err(LinkError::Closed)));
        assert!(matches!(a_tx.send(&Message::KeepAlive).await, Err(LinkError::Closed)));
    }
}
