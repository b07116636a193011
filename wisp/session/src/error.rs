//! Session error types

use thiserror::Error;
use wisp_keyexpr::KeyExprError;
use wisp_link::{LinkError, ResourceId};

use crate::config::ConfigError;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A key expression failed canonicalization.
    #[error("invalid key expression: {0}")]
    KeyExpr(#[from] KeyExprError),

    /// A resource id or entity is not known to the session.
    #[error("unknown resource {0}")]
    NotFound(ResourceId),

    /// The session is not open.
    #[error("session is closed")]
    SessionClosed,

    /// An operation did not complete within its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The underlying link failed.
    #[error("transport error: {0}")]
    Transport(#[from] LinkError),

    /// A declaration table reached its configured limit.
    #[error("{0} limit reached")]
    CapacityExceeded(&'static str),

    /// A configuration entry is missing or malformed.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}
