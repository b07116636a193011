//! Publisher declarations and handles

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use wisp_keyexpr::KeyExpr;
use wisp_link::{Encoding, ResourceId, SampleKind};

use crate::error::SessionError;
use crate::session::SessionInner;

/// What to do with samples when the link cannot keep up.
///
/// Declarative on this transport: samples are queued in order either
/// way, the option is kept for peers that shed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CongestionControl {
    /// Samples may be dropped under pressure.
    #[default]
    Drop,
    /// The publisher waits for the link to drain.
    Block,
}

/// Options accepted by [`Session::declare_publisher`](crate::Session::declare_publisher).
#[derive(Debug, Clone, Default)]
pub struct PublisherOptions {
    /// Encoding stamped on every sample this publisher writes.
    pub encoding: Encoding,
    /// Congestion behaviour.
    pub congestion_control: CongestionControl,
}

/// Options accepted by [`Session::put`](crate::Session::put).
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Encoding stamped on the sample.
    pub encoding: Encoding,
    /// Congestion behaviour.
    pub congestion_control: CongestionControl,
}

/// Options accepted by [`Session::delete`](crate::Session::delete).
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Congestion behaviour.
    pub congestion_control: CongestionControl,
}

pub(crate) struct PublisherEntry {
    pub(crate) id: u32,
    pub(crate) rid: ResourceId,
    pub(crate) expr: KeyExpr,
    pub(crate) options: PublisherOptions,
    active: AtomicBool,
}

impl PublisherEntry {
    pub(crate) fn new(id: u32, rid: ResourceId, expr: KeyExpr, options: PublisherOptions) -> Self {
        Self {
            id,
            rid,
            expr,
            options,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Long-lived writer bound to one declared key expression.
///
/// Returned by [`Session::declare_publisher`](crate::Session::declare_publisher).
/// Samples written here travel as the numeric resource id declared for
/// the expression instead of the full string.
pub struct Publisher {
    pub(crate) session: Weak<SessionInner>,
    pub(crate) entry: Arc<PublisherEntry>,
}

impl Publisher {
    /// The key expression samples are published on.
    pub fn keyexpr(&self) -> &KeyExpr {
        &self.entry.expr
    }

    /// Whether the publisher is still registered on a live session.
    pub fn is_valid(&self) -> bool {
        self.entry.is_active() && self.session.strong_count() > 0
    }

    /// Publishes a value using the publisher's declared encoding.
    pub async fn put(&self, payload: impl Into<Bytes>) -> Result<(), SessionError> {
        let inner = self.session.upgrade().ok_or(SessionError::SessionClosed)?;
        if !self.entry.is_active() {
            return Err(SessionError::NotFound(self.entry.rid));
        }
        inner
            .publisher_sample(&self.entry, payload.into(), SampleKind::Put)
            .await
    }

    /// Publishes a deletion for the publisher's key expression.
    pub async fn delete(&self) -> Result<(), SessionError> {
        let inner = self.session.upgrade().ok_or(SessionError::SessionClosed)?;
        if !self.entry.is_active() {
            return Err(SessionError::NotFound(self.entry.rid));
        }
        inner
            .publisher_sample(&self.entry, Bytes::new(), SampleKind::Delete)
            .await
    }

    /// Withdraws the declaration and releases its resource id reference.
    pub async fn undeclare(self) -> Result<(), SessionError> {
        let inner = self.session.upgrade().ok_or(SessionError::SessionClosed)?;
        inner.undeclare_publisher(&self.entry).await
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("id", &self.entry.id)
            .field("keyexpr", &self.entry.expr)
            .finish()
    }
}
