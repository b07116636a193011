//! Link layer for wisp: the protocol message model, a length-prefixed frame
//! codec, and concrete links the session engine drives through object-safe
//! traits.
//!
//! # Features
//!
//! - **Message model**: samples, queries, replies, resource declarations,
//!   keep-alives and hellos, with wire-compact resource references
//! - **Frame codec**: incremental decoding out of a fill buffer, size-capped
//!   against malformed peers
//! - **Links**: TCP (stream-framed) and in-memory channel pairs behind the
//!   same [`LinkTx`]/[`LinkRx`] traits
//! - **Scouting**: a UDP probe/hello medium behind [`ScoutMedium`]

#![warn(missing_docs)]
#![warn(clippy::all)]

mod codec;
mod error;
mod link;
pub mod mem;
mod message;
pub mod scout;
pub mod tcp;

pub use codec::{
    decode_datagram, encode_datagram, encode_frame, FrameDecoder, DEFAULT_MAX_FRAME,
    PROTOCOL_VERSION,
};
pub use error::LinkError;
pub use link::{BoxedLinkRx, BoxedLinkTx, LinkRx, LinkTx};
pub use message::{
    Encoding, Hello, Message, MessageKind, PeerId, QueryId, QueryTarget, ReplyBody, ResourceId,
    ResourceRef, SampleKind, Timestamp, WhatAmI, WhatAmIMatcher,
};
pub use scout::ScoutMedium;
