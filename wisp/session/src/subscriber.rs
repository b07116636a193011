//! Subscriber declarations and handles

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::warn;
use wisp_keyexpr::KeyExpr;
use wisp_link::ResourceId;

use crate::error::SessionError;
use crate::sample::Sample;
use crate::session::SessionInner;

/// Delivery guarantee requested by a subscriber.
///
/// Declarative on a single link: both levels ride the same ordered
/// transport, the option is kept for peers that downgrade traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reliability {
    /// Samples may be dropped under pressure.
    BestEffort,
    /// Samples are delivered in publication order.
    #[default]
    Reliable,
}

/// Options accepted by [`Session::declare_subscriber`](crate::Session::declare_subscriber).
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriberOptions {
    /// Requested delivery guarantee.
    pub reliability: Reliability,
}

pub(crate) struct SubscriberEntry {
    pub(crate) id: u32,
    pub(crate) rid: ResourceId,
    pub(crate) expr: KeyExpr,
    #[allow(dead_code)]
    pub(crate) options: SubscriberOptions,
    handler: Box<dyn Fn(Sample) + Send + Sync>,
    active: AtomicBool,
    invoke_lock: Mutex<()>,
}

impl SubscriberEntry {
    pub(crate) fn new(
        id: u32,
        rid: ResourceId,
        expr: KeyExpr,
        options: SubscriberOptions,
        handler: Box<dyn Fn(Sample) + Send + Sync>,
    ) -> Self {
        Self {
            id,
            rid,
            expr,
            options,
            handler,
            active: AtomicBool::new(true),
            invoke_lock: Mutex::new(()),
        }
    }

    /// Runs the handler for one sample.
    ///
    /// Serialized per entry by the invoke lock; a handler panic is
    /// contained and logged so the dispatch loop keeps running.
    pub(crate) async fn invoke(&self, sample: &Sample) {
        let _serial = self.invoke_lock.lock().await;
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let sample = sample.clone();
        if catch_unwind(AssertUnwindSafe(|| (self.handler)(sample))).is_err() {
            warn!("subscriber {} handler panicked on {}", self.id, self.expr);
        }
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Waits for any in-flight handler invocation to finish.
    pub(crate) async fn barrier(&self) {
        let _serial = self.invoke_lock.lock().await;
    }
}

/// Live subscription handle returned by
/// [`Session::declare_subscriber`](crate::Session::declare_subscriber).
///
/// Dropping the handle does not undeclare the subscription; call
/// [`undeclare`](Subscriber::undeclare) to stop deliveries.
pub struct Subscriber {
    pub(crate) session: Weak<SessionInner>,
    pub(crate) entry: Arc<SubscriberEntry>,
}

impl Subscriber {
    /// The canonical key expression this subscriber matches against.
    pub fn keyexpr(&self) -> &KeyExpr {
        &self.entry.expr
    }

    /// Whether the subscription is still registered on a live session.
    pub fn is_valid(&self) -> bool {
        self.entry.is_active() && self.session.strong_count() > 0
    }

    /// Removes the subscription.
    ///
    /// Once this returns the handler will not be invoked again. Must not
    /// be called from inside this subscriber's own handler.
    pub async fn undeclare(self) -> Result<(), SessionError> {
        let inner = self.session.upgrade().ok_or(SessionError::SessionClosed)?;
        inner.undeclare_subscriber(&self.entry).await
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.entry.id)
            .field("keyexpr", &self.entry.expr)
            .finish()
    }
}
