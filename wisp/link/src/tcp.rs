//! TCP link: length-prefixed frames over a stream socket.

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::codec::{encode_frame, FrameDecoder};
use crate::error::LinkError;
use crate::link::{LinkRx, LinkTx};
use crate::message::Message;

const READ_BUF_CAPACITY: usize = 4096;

/// Write half of a TCP link.
pub struct TcpLinkTx {
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

/// Read half of a TCP link.
pub struct TcpLinkRx {
    reader: OwnedReadHalf,
    buf: BytesMut,
    decoder: FrameDecoder,
    peer: SocketAddr,
}

fn split_stream(stream: TcpStream, peer: SocketAddr) -> (TcpLinkTx, TcpLinkRx) {
    let (reader, writer) = stream.into_split();
    (
        TcpLinkTx { writer, peer },
        TcpLinkRx {
            reader,
            buf: BytesMut::with_capacity(READ_BUF_CAPACITY),
            decoder: FrameDecoder::new(),
            peer,
        },
    )
}

/// Dials `addr` and returns the connected link halves.
pub async fn connect(addr: SocketAddr) -> Result<(TcpLinkTx, TcpLinkRx), LinkError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!("tcp link connected to {}", addr);
    Ok(split_stream(stream, addr))
}

/// Passive side: accepts inbound TCP links.
pub struct TcpAcceptor {
    inner: TcpListener,
}

impl TcpAcceptor {
    /// Binds a listener on `addr`.
    pub async fn bind(addr: SocketAddr) -> Result<Self, LinkError> {
        let inner = TcpListener::bind(addr).await?;
        Ok(TcpAcceptor { inner })
    }

    /// The bound local address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.inner.local_addr()?)
    }

    /// Accepts one inbound connection as link halves.
    pub async fn accept(&self) -> Result<(TcpLinkTx, TcpLinkRx), LinkError> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        debug!("tcp link accepted from {}", peer);
        Ok(split_stream(stream, peer))
    }
}

#[async_trait]
impl LinkTx for TcpLinkTx {
    async fn send(&mut self, msg: &Message) -> Result<(), LinkError> {
        let frame = encode_frame(msg)?;
        self.writer.write_all(&frame).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.writer.shutdown().await?;
        Ok(())
    }

    fn locator(&self) -> String {
        format!("tcp/{}", self.peer)
    }
}

#[async_trait]
impl LinkRx for TcpLinkRx {
    async fn recv(&mut self) -> Result<Message, LinkError> {
        loop {
            if let Some(msg) = self.decoder.decode(&mut self.buf)? {
                return Ok(msg);
            }
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(LinkError::Closed);
            }
        }
    }

    fn locator(&self) -> String {
        format!("tcp/{}", self.peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{QueryId, QueryTarget, ResourceRef};

    #[tokio::test]
    async fn test_tcp_link_roundtrip() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut tx, mut rx) = acceptor.accept().await.unwrap();
            let msg = rx.recv().await.unwrap();
            tx.send(&msg).await.unwrap();
            tx.close().await.unwrap();
        });

        let (mut tx, mut rx) = connect(addr).await.unwrap();
        let sent = Message::Query {
            id: QueryId(5),
            resource: ResourceRef::Expr("demo/**".to_string()),
            parameters: "echo".to_string(),
            target: QueryTarget::default(),
        };
        tx.send(&sent).await.unwrap();
        let echoed = rx.recv().await.unwrap();
        assert_eq!(echoed, sent);
        assert!(matches!(rx.recv().await, Err(LinkError::Closed)));
        server.await.unwrap();
    }
}
