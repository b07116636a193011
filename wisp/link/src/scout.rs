//! Scout medium: discovery probes out, hello responses back.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::codec::{decode_datagram, encode_datagram};
use crate::error::LinkError;
use crate::message::{Hello, Message, WhatAmIMatcher};

/// Default multicast group scouting probes are sent to.
pub const DEFAULT_SCOUT_ADDR: &str = "224.0.0.224:7446";

const DATAGRAM_CAPACITY: usize = 2048;

/// Medium a scout exchange runs over.
///
/// Responders answer probes with unicast hellos; the prober only ever sends
/// probes and collects hellos.
#[async_trait]
pub trait ScoutMedium: Send {
    /// Broadcasts one probe asking the given roles to respond.
    async fn send_probe(&mut self, what: WhatAmIMatcher) -> Result<(), LinkError>;

    /// Receives the next hello response.
    async fn recv_hello(&mut self) -> Result<Hello, LinkError>;
}

/// UDP scout medium: probes a (multicast) group address, collects the
/// unicast hellos responders send back to the probing socket.
pub struct UdpScout {
    socket: UdpSocket,
    group: SocketAddr,
    buf: Vec<u8>,
}

impl UdpScout {
    /// Opens an ephemeral socket probing `group`.
    pub async fn open(group: SocketAddr) -> Result<Self, LinkError> {
        let bind_addr = if group.is_ipv4() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(UdpScout {
            socket,
            group,
            buf: vec![0u8; DATAGRAM_CAPACITY],
        })
    }
}

#[async_trait]
impl ScoutMedium for UdpScout {
    async fn send_probe(&mut self, what: WhatAmIMatcher) -> Result<(), LinkError> {
        let probe = encode_datagram(&Message::Scout { what })?;
        self.socket.send_to(&probe, self.group).await?;
        Ok(())
    }

    async fn recv_hello(&mut self) -> Result<Hello, LinkError> {
        loop {
            let (n, from) = self.socket.recv_from(&mut self.buf).await?;
            match decode_datagram(Bytes::copy_from_slice(&self.buf[..n])) {
                Ok(Message::Hello(hello)) => return Ok(hello),
                Ok(other) => {
                    debug!("ignoring {:?} scout datagram from {}", other.kind(), from)
                }
                Err(err) => debug!("dropping malformed scout datagram from {}: {}", from, err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{PeerId, WhatAmI};

    // A unicast loopback stand-in for the multicast group: responders can
    // answer probes from any address, multicast or not.
    #[tokio::test]
    async fn test_udp_probe_and_hello() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let group = responder.local_addr().unwrap();
        let zid = PeerId::random();

        let answer = tokio::spawn(async move {
            let mut buf = vec![0u8; DATAGRAM_CAPACITY];
            let (n, from) = responder.recv_from(&mut buf).await.unwrap();
            let probe = decode_datagram(Bytes::copy_from_slice(&buf[..n])).unwrap();
            assert!(matches!(probe, Message::Scout { .. }));
            let hello = encode_datagram(&Message::Hello(Hello {
                zid,
                whatami: WhatAmI::Router,
                locators: vec!["tcp/127.0.0.1:7447".to_string()],
            }))
            .unwrap();
            responder.send_to(&hello, from).await.unwrap();
        });

        let mut scout = UdpScout::open(group).await.unwrap();
        scout.send_probe(WhatAmIMatcher::default()).await.unwrap();
        let hello = scout.recv_hello().await.unwrap();
        assert_eq!(hello.zid, zid);
        assert_eq!(hello.whatami, WhatAmI::Router);
        answer.await.unwrap();
    }
}
