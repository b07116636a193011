//! Queryable declarations and inbound queries

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::warn;
use wisp_keyexpr::{canonize, KeyExpr};
use wisp_link::{Encoding, Message, QueryId, ReplyBody, ResourceId, Timestamp};

use crate::error::SessionError;
use crate::runtime::Origin;
use crate::session::SessionInner;

/// Options accepted by [`Session::declare_queryable`](crate::Session::declare_queryable).
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryableOptions {
    /// Whether this queryable holds the complete value set for its key
    /// expression. Complete queryables are the only ones consulted by
    /// queries targeting `AllComplete`.
    pub complete: bool,
}

/// Options accepted by [`Query::reply`].
#[derive(Debug, Clone, Default)]
pub struct ReplyOptions {
    /// Encoding stamped on the reply payload.
    pub encoding: Encoding,
}

pub(crate) struct QueryableEntry {
    pub(crate) id: u32,
    pub(crate) rid: ResourceId,
    pub(crate) expr: KeyExpr,
    pub(crate) options: QueryableOptions,
    handler: Box<dyn Fn(Query) + Send + Sync>,
    active: AtomicBool,
    invoke_lock: Mutex<()>,
}

impl QueryableEntry {
    pub(crate) fn new(
        id: u32,
        rid: ResourceId,
        expr: KeyExpr,
        options: QueryableOptions,
        handler: Box<dyn Fn(Query) + Send + Sync>,
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

    /// Runs the handler for one query, panic-contained like subscriber
    /// dispatch.
    pub(crate) async fn invoke(&self, query: Query) {
        let _serial = self.invoke_lock.lock().await;
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| (self.handler)(query))).is_err() {
            warn!("queryable {} handler panicked on {}", self.id, self.expr);
        }
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) async fn barrier(&self) {
        let _serial = self.invoke_lock.lock().await;
    }
}

/// Live queryable handle returned by
/// [`Session::declare_queryable`](crate::Session::declare_queryable).
pub struct Queryable {
    pub(crate) session: Weak<SessionInner>,
    pub(crate) entry: Arc<QueryableEntry>,
}

impl Queryable {
    /// The key expression queries are matched against.
    pub fn keyexpr(&self) -> &KeyExpr {
        &self.entry.expr
    }

    /// Whether the queryable is still registered on a live session.
    pub fn is_valid(&self) -> bool {
        self.entry.is_active() && self.session.strong_count() > 0
    }

    /// Removes the queryable.
    ///
    /// Once this returns the handler will not be invoked again. Must not
    /// be called from inside this queryable's own handler.
    pub async fn undeclare(self) -> Result<(), SessionError> {
        let inner = self.session.upgrade().ok_or(SessionError::SessionClosed)?;
        inner.undeclare_queryable(&self.entry).await
    }
}

impl std::fmt::Debug for Queryable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queryable")
            .field("id", &self.entry.id)
            .field("keyexpr", &self.entry.expr)
            .finish()
    }
}

/// One query delivered to a queryable handler.
///
/// Replies are queued, not awaited, so handlers stay synchronous; they
/// reach the querier tagged with the query id and are consolidated
/// there. A handler may reply any number of times, including zero.
pub struct Query {
    pub(crate) id: QueryId,
    pub(crate) keyexpr: KeyExpr,
    pub(crate) parameters: String,
    pub(crate) origin: Origin,
    pub(crate) session: Weak<SessionInner>,
}

impl Query {
    /// The selector of the query, resolved to a canonical key expression.
    pub fn keyexpr(&self) -> &KeyExpr {
        &self.keyexpr
    }

    /// Free-form parameters carried alongside the selector.
    pub fn parameters(&self) -> &str {
        &self.parameters
    }

    /// Sends a value back to the querier.
    ///
    /// `keyexpr` names the key the value belongs to and should be a
    /// literal expression inside the query's selector.
    pub fn reply(
        &self,
        keyexpr: &str,
        payload: impl Into<Bytes>,
        options: ReplyOptions,
    ) -> Result<(), SessionError> {
        let keyexpr = canonize(keyexpr)?.into_owned();
        self.route(Message::Reply {
            id: self.id,
            body: ReplyBody::Ok {
                keyexpr,
                encoding: options.encoding,
                timestamp: Timestamp::now(),
                payload: payload.into(),
            },
        })
    }

    /// Sends an application-level error back to the querier.
    pub fn reply_err(&self, payload: impl Into<Bytes>) -> Result<(), SessionError> {
        self.route(Message::Reply {
            id: self.id,
            body: ReplyBody::Err {
                payload: payload.into(),
            },
        })
    }

    fn route(&self, message: Message) -> Result<(), SessionError> {
        let inner = self.session.upgrade().ok_or(SessionError::SessionClosed)?;
        match self.origin {
            Origin::Local => inner.enqueue_loop(message),
            Origin::Peer => inner.enqueue_wire(message),
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("keyexpr", &self.keyexpr)
            .field("parameters", &self.parameters)
            .finish()
    }
}
