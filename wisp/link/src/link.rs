use async_trait::async_trait;

use crate::error::LinkError;
use crate::message::Message;

/// Write half of a point-to-point link.
#[async_trait]
pub trait LinkTx: Send {
    /// Sends one message; completes once it is handed to the transport.
    async fn send(&mut self, msg: &Message) -> Result<(), LinkError>;

    /// Closes the link for writing; the peer observes end-of-stream.
    async fn close(&mut self) -> Result<(), LinkError>;

    /// Human-readable endpoint description for logs.
    fn locator(&self) -> String;
}

/// Read half of a point-to-point link.
#[async_trait]
pub trait LinkRx: Send {
    /// Receives the next decoded message.
    ///
    /// Cancel safe: a cancelled call leaves partial input buffered for the
    /// next one. Returns [`LinkError::Closed`] once the peer is gone.
    async fn recv(&mut self) -> Result<Message, LinkError>;

    /// Human-readable endpoint description for logs.
    fn locator(&self) -> String;
}

/// Owned trait-object write half.
pub type BoxedLinkTx = Box<dyn LinkTx>;

/// Owned trait-object read half.
pub type BoxedLinkRx = Box<dyn LinkRx>;
