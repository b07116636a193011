use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::LinkError;

/// Identifier of a declared resource, scoped to the declaring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rid:{}", self.0)
    }
}

/// Identifier of an outstanding query, scoped to the issuing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub u32);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qid:{}", self.0)
    }
}

/// 16-byte peer identifier, carried in hellos and exposed by session info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        PeerId(Uuid::new_v4())
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Rebuilds an identifier from its raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        PeerId(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// The role a process announces during discovery and session handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WhatAmI {
    /// Infrastructure router.
    Router = 0x01,
    /// Peer participating in the mesh directly.
    Peer = 0x02,
    /// Leaf client connected through a single link.
    Client = 0x04,
}

impl TryFrom<u8> for WhatAmI {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(WhatAmI::Router),
            0x02 => Ok(WhatAmI::Peer),
            0x04 => Ok(WhatAmI::Client),
            _ => Err(LinkError::Malformed),
        }
    }
}

impl fmt::Display for WhatAmI {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WhatAmI::Router => "router",
            WhatAmI::Peer => "peer",
            WhatAmI::Client => "client",
        };
        f.write_str(name)
    }
}

impl FromStr for WhatAmI {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "router" => Ok(WhatAmI::Router),
            "peer" => Ok(WhatAmI::Peer),
            "client" => Ok(WhatAmI::Client),
            _ => Err(()),
        }
    }
}

bitflags! {
    /// Mask of roles a scout probe is interested in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WhatAmIMatcher: u8 {
        /// Match routers.
        const ROUTER = 0x01;
        /// Match peers.
        const PEER = 0x02;
        /// Match clients.
        const CLIENT = 0x04;
    }
}

impl WhatAmIMatcher {
    /// True when `kind` is selected by this mask.
    pub fn matches(&self, kind: WhatAmI) -> bool {
        self.bits() & kind as u8 != 0
    }
}

impl Default for WhatAmIMatcher {
    fn default() -> Self {
        WhatAmIMatcher::ROUTER | WhatAmIMatcher::PEER
    }
}

/// Payload encoding hint carried alongside samples and replies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Encoding {
    /// No declared encoding.
    #[default]
    Empty,
    /// UTF-8 text.
    TextPlain,
    /// Opaque bytes.
    AppOctetStream,
    /// JSON document.
    AppJson,
    /// Application-defined schema string.
    Custom(String),
}

impl Encoding {
    pub(crate) fn prefix(&self) -> u8 {
        match self {
            Encoding::Empty => 0x00,
            Encoding::TextPlain => 0x01,
            Encoding::AppOctetStream => 0x02,
            Encoding::AppJson => 0x03,
            Encoding::Custom(_) => 0xff,
        }
    }
}

/// Whether a sample carries a value or retracts one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SampleKind {
    /// The sample sets a value for its key expression.
    #[default]
    Put = 0x00,
    /// The sample deletes the value for its key expression.
    Delete = 0x01,
}

impl TryFrom<u8> for SampleKind {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(SampleKind::Put),
            0x01 => Ok(SampleKind::Delete),
            _ => Err(LinkError::Malformed),
        }
    }
}

/// Which queryables on the receiving side may answer a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QueryTarget {
    /// Let the receiver pick a sufficient set of queryables.
    #[default]
    BestMatching = 0x00,
    /// Every matching queryable answers.
    All = 0x01,
    /// Every matching queryable that declared itself complete answers.
    AllComplete = 0x02,
}

impl TryFrom<u8> for QueryTarget {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(QueryTarget::BestMatching),
            0x01 => Ok(QueryTarget::All),
            0x02 => Ok(QueryTarget::AllComplete),
            _ => Err(LinkError::Malformed),
        }
    }
}

/// Nanoseconds since the UNIX epoch, strictly monotonic within a process so
/// that consolidation ordering is total even for back-to-back samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

impl Timestamp {
    /// Current time, bumped past the previous stamp when the wall clock
    /// has not advanced.
    pub fn now() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let mut prev = LAST_STAMP.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match LAST_STAMP.compare_exchange_weak(
                prev,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Timestamp(next),
                Err(observed) => prev = observed,
            }
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A key-expression reference on the wire: either the literal text or the
/// id of a previously declared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
    /// Literal canonical key expression.
    Expr(String),
    /// Declared resource id, resolved against the receiver's learned table.
    Id(ResourceId),
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Expr(expr) => f.write_str(expr),
            ResourceRef::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Discovery response describing one reachable process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// The responder's identifier.
    pub zid: PeerId,
    /// The responder's role.
    pub whatami: WhatAmI,
    /// Locators the responder can be dialed at.
    pub locators: Vec<String>,
}

/// Reply body: a resolved sample or an application error payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// Successful reply carrying a value.
    Ok {
        /// Literal key expression the value belongs to.
        keyexpr: String,
        /// Payload encoding hint.
        encoding: Encoding,
        /// Stamp assigned by the replier.
        timestamp: Timestamp,
        /// The value itself.
        payload: Bytes,
    },
    /// The queryable signalled a failure.
    Err {
        /// Application-defined error payload.
        payload: Bytes,
    },
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Binds a resource id to a key expression in the receiver's table.
    DeclareResource {
        /// Id chosen by the declaring side.
        id: ResourceId,
        /// Canonical key expression being bound.
        expr: String,
    },
    /// Retracts a previously declared resource id.
    ForgetResource {
        /// Id to drop from the receiver's table.
        id: ResourceId,
    },
    /// A published value or deletion.
    Sample {
        /// Key the sample applies to.
        resource: ResourceRef,
        /// Put or delete.
        kind: SampleKind,
        /// Payload encoding hint.
        encoding: Encoding,
        /// Publisher-assigned stamp.
        timestamp: Timestamp,
        /// The value.
        payload: Bytes,
    },
    /// A request for values matching a selector.
    Query {
        /// Query id, scoped to the issuing session.
        id: QueryId,
        /// Selector the queryables are matched against.
        resource: ResourceRef,
        /// Free-form query parameters.
        parameters: String,
        /// Which queryables may answer.
        target: QueryTarget,
    },
    /// An answer to an outstanding query.
    Reply {
        /// The query being answered.
        id: QueryId,
        /// Value or error.
        body: ReplyBody,
    },
    /// Lease keep-alive, no payload.
    KeepAlive,
    /// Identity announcement used by handshakes and discovery.
    Hello(Hello),
    /// Discovery probe, datagram-only.
    Scout {
        /// Roles the prober wants to hear from.
        what: WhatAmIMatcher,
    },
}

/// Wire kind byte for a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// [`Message::DeclareResource`]
    DeclareResource = 0x01,
    /// [`Message::ForgetResource`]
    ForgetResource = 0x02,
    /// [`Message::Sample`]
    Sample = 0x03,
    /// [`Message::Query`]
    Query = 0x04,
    /// [`Message::Reply`]
    Reply = 0x05,
    /// [`Message::KeepAlive`]
    KeepAlive = 0x06,
    /// [`Message::Hello`]
    Hello = 0x07,
    /// [`Message::Scout`]
    Scout = 0x08,
}

impl TryFrom<u8> for MessageKind {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageKind::DeclareResource),
            0x02 => Ok(MessageKind::ForgetResource),
            0x03 => Ok(MessageKind::Sample),
            0x04 => Ok(MessageKind::Query),
            0x05 => Ok(MessageKind::Reply),
            0x06 => Ok(MessageKind::KeepAlive),
            0x07 => Ok(MessageKind::Hello),
            0x08 => Ok(MessageKind::Scout),
            other => Err(LinkError::UnknownKind(other)),
        }
    }
}

impl Message {
    /// The wire kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::DeclareResource { .. } => MessageKind::DeclareResource,
            Message::ForgetResource { .. } => MessageKind::ForgetResource,
            Message::Sample { .. } => MessageKind::Sample,
            Message::Query { .. } => MessageKind::Query,
            Message::Reply { .. } => MessageKind::Reply,
            Message::KeepAlive => MessageKind::KeepAlive,
            Message::Hello(_) => MessageKind::Hello,
            Message::Scout { .. } => MessageKind::Scout,
        }
    }
}
