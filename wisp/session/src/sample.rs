//! Data samples delivered to subscribers and query handlers

use bytes::Bytes;
use wisp_keyexpr::KeyExpr;
use wisp_link::{Encoding, SampleKind, Timestamp};

/// One piece of data associated with a key expression.
///
/// Samples reach subscriber handlers on publication and come back inside
/// [`Reply`](crate::Reply) values during queries. The timestamp is
/// assigned by the publishing side and drives reply consolidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// The key expression the data was published on.
    pub keyexpr: KeyExpr,
    /// The payload bytes; empty for deletes.
    pub payload: Bytes,
    /// Declared payload encoding.
    pub encoding: Encoding,
    /// Whether this sample puts or deletes the value.
    pub kind: SampleKind,
    /// Publisher-side timestamp.
    pub timestamp: Timestamp,
}
