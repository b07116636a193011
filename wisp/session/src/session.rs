//! Session lifecycle and the declare/put/get surface
//!
//! A [`Session`] owns every table behind one tokio mutex and two
//! background tasks. All outbound traffic goes through an unbounded
//! queue drained by the lease task, which is the only writer on the
//! link; everything to be delivered locally goes through a loopback
//! queue drained by the read task, which is the only place handlers
//! run. Foreground calls therefore never block on the network and
//! never invoke handlers themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wisp_keyexpr::{canonize, KeyExpr};
use wisp_link::{
    tcp, BoxedLinkRx, BoxedLinkTx, Encoding, Hello, LinkError, Message, PeerId, QueryId,
    ResourceId, ResourceRef, SampleKind, Timestamp, WhatAmI,
};

use crate::config::{Config, ConfigError, SessionConfig};
use crate::error::SessionError;
use crate::publisher::{
    CongestionControl, DeleteOptions, Publisher, PublisherEntry, PublisherOptions, PutOptions,
};
use crate::query::{GetOptions, PendingQuery, Reply, ReplyHandler};
use crate::queryable::{Query, Queryable, QueryableEntry, QueryableOptions};
use crate::registry::{ResourceRegistry, Undeclare};
use crate::runtime;
use crate::sample::Sample;
use crate::subscriber::{Subscriber, SubscriberEntry, SubscriberOptions};

/// Key argument accepted by data operations: a literal expression or a
/// previously declared one.
#[derive(Debug, Clone, Copy)]
pub enum KeyRef<'a> {
    /// Literal expression, canonicalized on use and sent as text.
    Str(&'a str),
    /// Declared expression, sent as its numeric id.
    Declared(&'a DeclaredKeyExpr),
}

impl<'a> From<&'a str> for KeyRef<'a> {
    fn from(value: &'a str) -> Self {
        KeyRef::Str(value)
    }
}

impl<'a> From<&'a KeyExpr> for KeyRef<'a> {
    fn from(value: &'a KeyExpr) -> Self {
        KeyRef::Str(value.as_str())
    }
}

impl<'a> From<&'a DeclaredKeyExpr> for KeyRef<'a> {
    fn from(value: &'a DeclaredKeyExpr) -> Self {
        KeyRef::Declared(value)
    }
}

/// A key expression registered with
/// [`Session::declare_keyexpr`], carrying the numeric id samples and
/// queries travel under.
pub struct DeclaredKeyExpr {
    pub(crate) session: Weak<SessionInner>,
    pub(crate) rid: ResourceId,
    pub(crate) expr: KeyExpr,
}

impl DeclaredKeyExpr {
    /// The canonical expression this declaration is bound to.
    pub fn keyexpr(&self) -> &KeyExpr {
        &self.expr
    }

    /// The session-scoped resource id.
    pub fn id(&self) -> ResourceId {
        self.rid
    }

    /// Whether the owning session is still live.
    pub fn is_valid(&self) -> bool {
        self.session.strong_count() > 0
    }
}

impl std::fmt::Debug for DeclaredKeyExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeclaredKeyExpr")
            .field("id", &self.rid)
            .field("keyexpr", &self.expr)
            .finish()
    }
}

/// Identity snapshot returned by [`Session::info`].
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// This session's identifier.
    pub zid: PeerId,
    /// Connected peers and clients.
    pub peers: Vec<PeerId>,
    /// Connected routers.
    pub routers: Vec<PeerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Opening,
    Open,
    Closing,
    Closed,
}

pub(crate) struct PeerInfo {
    pub(crate) zid: PeerId,
    pub(crate) whatami: WhatAmI,
}

pub(crate) struct State {
    pub(crate) phase: Phase,
    pub(crate) registry: ResourceRegistry,
    pub(crate) subscribers: Vec<Arc<SubscriberEntry>>,
    pub(crate) queryables: Vec<Arc<QueryableEntry>>,
    pub(crate) publishers: Vec<Arc<PublisherEntry>>,
    pub(crate) queries: HashMap<QueryId, PendingQuery>,
    pub(crate) peer: Option<PeerInfo>,
    next_entity: u32,
    next_query: u32,
}

impl State {
    fn new() -> Self {
        Self {
            phase: Phase::Opening,
            registry: ResourceRegistry::new(),
            subscribers: Vec::new(),
            queryables: Vec::new(),
            publishers: Vec::new(),
            queries: HashMap::new(),
            peer: None,
            next_entity: 0,
            next_query: 0,
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<(), SessionError> {
        if self.phase == Phase::Open {
            Ok(())
        } else {
            Err(SessionError::SessionClosed)
        }
    }

    fn next_entity_id(&mut self) -> u32 {
        self.next_entity += 1;
        self.next_entity
    }

    fn next_query_id(&mut self) -> QueryId {
        self.next_query += 1;
        QueryId(self.next_query)
    }

    /// Deactivates every entry and clears all tables. Pending query
    /// handlers are dropped without a flush.
    fn teardown(&mut self) {
        for entry in &self.subscribers {
            entry.deactivate();
        }
        for entry in &self.queryables {
            entry.deactivate();
        }
        for entry in &self.publishers {
            entry.deactivate();
        }
        self.subscribers.clear();
        self.queryables.clear();
        self.publishers.clear();
        self.queries.clear();
        self.registry.clear();
        self.peer = None;
    }
}

struct TaskHandles {
    read: JoinHandle<()>,
    lease: JoinHandle<()>,
}

pub(crate) struct SessionInner {
    pub(crate) zid: PeerId,
    pub(crate) config: SessionConfig,
    pub(crate) state: Mutex<State>,
    out_tx: mpsc::UnboundedSender<Message>,
    loop_tx: mpsc::UnboundedSender<Message>,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Option<TaskHandles>>,
    open_flag: AtomicBool,
    /// Milliseconds since `started` when the peer was last heard.
    last_rx: AtomicU64,
    started: Instant,
}

impl SessionInner {
    async fn open(
        config: SessionConfig,
        mut tx: BoxedLinkTx,
        mut rx: BoxedLinkRx,
    ) -> Result<Session, SessionError> {
        let zid = PeerId::random();
        info!("opening session {} ({}) via {}", zid, config.mode, tx.locator());

        tx.send(&Message::Hello(Hello {
            zid,
            whatami: config.mode,
            locators: Vec::new(),
        }))
        .await?;
        let handshake = async {
            loop {
                match rx.recv().await {
                    Ok(Message::Hello(hello)) => {
                        break Ok(PeerInfo {
                            zid: hello.zid,
                            whatami: hello.whatami,
                        })
                    }
                    Ok(other) => debug!("ignoring {:?} during handshake", other.kind()),
                    Err(err) => break Err(SessionError::from(err)),
                }
            }
        };
        let peer = match tokio::time::timeout(config.open_timeout, handshake).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = tx.close().await;
                return Err(SessionError::Timeout);
            }
        };
        info!("session {} connected to {} {}", zid, peer.whatami, peer.zid);

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut state = State::new();
        state.phase = Phase::Open;
        state.peer = Some(peer);

        let inner = Arc::new(SessionInner {
            zid,
            config,
            state: Mutex::new(state),
            out_tx,
            loop_tx,
            stop_tx,
            tasks: Mutex::new(None),
            open_flag: AtomicBool::new(true),
            last_rx: AtomicU64::new(0),
            started: Instant::now(),
        });

        let read = tokio::spawn(runtime::read_task(
            inner.clone(),
            rx,
            loop_rx,
            stop_rx.clone(),
        ));
        let lease = tokio::spawn(runtime::lease_task(inner.clone(), tx, out_rx, stop_rx));
        *inner.tasks.lock().await = Some(TaskHandles { read, lease });

        Ok(Session { inner })
    }

    /// Queues a message for the link. Fails once the lease task is gone.
    pub(crate) fn enqueue_wire(&self, message: Message) -> Result<(), SessionError> {
        self.out_tx
            .send(message)
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Queues a message for local dispatch by the read task.
    pub(crate) fn enqueue_loop(&self, message: Message) -> Result<(), SessionError> {
        self.loop_tx
            .send(message)
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Records that the peer was heard from just now.
    pub(crate) fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_rx.store(elapsed, Ordering::Relaxed);
    }

    /// How long the peer has been silent.
    pub(crate) fn silence(&self) -> Duration {
        let elapsed = self.started.elapsed().as_millis() as u64;
        Duration::from_millis(elapsed.saturating_sub(self.last_rx.load(Ordering::Relaxed)))
    }

    async fn close(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Open {
                return Ok(());
            }
            state.phase = Phase::Closing;
        }
        self.open_flag.store(false, Ordering::Release);
        info!("closing session {}", self.zid);
        let _ = self.stop_tx.send(true);
        if let Some(handles) = self.tasks.lock().await.take() {
            if let Err(err) = handles.read.await {
                debug!("read task join error: {}", err);
            }
            if let Err(err) = handles.lease.await {
                debug!("lease task join error: {}", err);
            }
        }
        let mut state = self.state.lock().await;
        state.teardown();
        state.phase = Phase::Closed;
        info!("session {} closed", self.zid);
        Ok(())
    }

    /// Tears the session down after a link failure or lease expiry.
    ///
    /// Runs on a background task, so it signals the other task instead
    /// of joining anything. A concurrent or later `close` sees the
    /// phase already moved and returns immediately.
    pub(crate) async fn connection_lost(&self, reason: &str) {
        {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Open {
                return;
            }
            state.phase = Phase::Closing;
        }
        self.open_flag.store(false, Ordering::Release);
        warn!("session {}: connection lost: {}", self.zid, reason);
        let _ = self.stop_tx.send(true);
        let mut state = self.state.lock().await;
        state.teardown();
        state.phase = Phase::Closed;
    }

    pub(crate) async fn send_sample(
        &self,
        key: KeyRef<'_>,
        payload: Bytes,
        encoding: Encoding,
        kind: SampleKind,
        _congestion: CongestionControl,
    ) -> Result<(), SessionError> {
        let resource = resolve_key(key)?;
        {
            let state = self.state.lock().await;
            state.ensure_open()?;
        }
        let message = Message::Sample {
            resource,
            kind,
            encoding,
            timestamp: Timestamp::now(),
            payload,
        };
        self.enqueue_wire(message.clone())?;
        self.enqueue_loop(message)
    }

    pub(crate) async fn publisher_sample(
        &self,
        entry: &PublisherEntry,
        payload: Bytes,
        kind: SampleKind,
    ) -> Result<(), SessionError> {
        {
            let state = self.state.lock().await;
            state.ensure_open()?;
        }
        let encoding = match kind {
            SampleKind::Put => entry.options.encoding.clone(),
            SampleKind::Delete => Encoding::Empty,
        };
        let message = Message::Sample {
            resource: ResourceRef::Id(entry.rid),
            kind,
            encoding,
            timestamp: Timestamp::now(),
            payload,
        };
        self.enqueue_wire(message.clone())?;
        self.enqueue_loop(message)
    }

    async fn issue_query(
        self: &Arc<Self>,
        key: KeyRef<'_>,
        parameters: &str,
        handler: ReplyHandler,
        options: GetOptions,
    ) -> Result<(), SessionError> {
        let (resource, expr) = match key {
            KeyRef::Str(text) => {
                let expr = KeyExpr::new(text)?;
                (ResourceRef::Expr(expr.to_string()), expr)
            }
            KeyRef::Declared(declared) => {
                (ResourceRef::Id(declared.rid), declared.expr.clone())
            }
        };
        let qid = {
            let mut state = self.state.lock().await;
            state.ensure_open()?;
            if state.queries.len() >= self.config.limits.queries {
                warn!("session {}: query limit reached", self.zid);
                return Err(SessionError::CapacityExceeded("query"));
            }
            let qid = state.next_query_id();
            let mode = options.consolidation.resolve(options.target);
            state.queries.insert(qid, PendingQuery::new(expr, mode, handler));
            qid
        };
        let message = Message::Query {
            id: qid,
            resource,
            parameters: parameters.to_string(),
            target: options.target,
        };
        self.enqueue_wire(message.clone())?;
        self.enqueue_loop(message)?;
        debug!(
            "session {}: query {} open for {:?}",
            self.zid, qid, options.timeout
        );

        // the deadline is a timer, not a reply count
        let weak = Arc::downgrade(self);
        let deadline = options.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.finalize_query(qid).await;
            }
        });
        Ok(())
    }

    /// Removes a pending query and flushes whatever `latest` buffered.
    ///
    /// Idempotent: the entry is gone after the first call, so a second
    /// finalization (or one racing session close) is a no-op.
    pub(crate) async fn finalize_query(&self, qid: QueryId) {
        let pending = self.state.lock().await.queries.remove(&qid);
        let Some(pending) = pending else { return };
        let (handler, replies) = pending.finalize();
        if !replies.is_empty() {
            debug!(
                "session {}: query {} flushing {} consolidated replies",
                self.zid,
                qid,
                replies.len()
            );
        }
        for reply in replies {
            runtime::invoke_reply(&handler, reply);
        }
        debug!("session {}: query {} finalized", self.zid, qid);
    }

    fn release_resource(&self, state: &mut State, rid: ResourceId) -> Result<(), SessionError> {
        if let Undeclare::Removed(_) = state.registry.undeclare(rid)? {
            self.enqueue_wire(Message::ForgetResource { id: rid })?;
        }
        Ok(())
    }

    pub(crate) async fn undeclare_subscriber(
        &self,
        entry: &Arc<SubscriberEntry>,
    ) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().await;
            state.ensure_open()?;
            let before = state.subscribers.len();
            state.subscribers.retain(|candidate| !Arc::ptr_eq(candidate, entry));
            if state.subscribers.len() == before {
                return Err(SessionError::NotFound(entry.rid));
            }
            entry.deactivate();
            self.release_resource(&mut state, entry.rid)?;
            debug!("session {}: subscriber {} undeclared", self.zid, entry.id);
        }
        // wait out any invocation that picked the entry up before removal
        entry.barrier().await;
        Ok(())
    }

    pub(crate) async fn undeclare_queryable(
        &self,
        entry: &Arc<QueryableEntry>,
    ) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().await;
            state.ensure_open()?;
            let before = state.queryables.len();
            state.queryables.retain(|candidate| !Arc::ptr_eq(candidate, entry));
            if state.queryables.len() == before {
                return Err(SessionError::NotFound(entry.rid));
            }
            entry.deactivate();
            self.release_resource(&mut state, entry.rid)?;
            debug!("session {}: queryable {} undeclared", self.zid, entry.id);
        }
        entry.barrier().await;
        Ok(())
    }

    pub(crate) async fn undeclare_publisher(
        &self,
        entry: &Arc<PublisherEntry>,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        let before = state.publishers.len();
        state.publishers.retain(|candidate| !Arc::ptr_eq(candidate, entry));
        if state.publishers.len() == before {
            return Err(SessionError::NotFound(entry.rid));
        }
        entry.deactivate();
        self.release_resource(&mut state, entry.rid)?;
        debug!("session {}: publisher {} undeclared", self.zid, entry.id);
        Ok(())
    }
}

fn resolve_key(key: KeyRef<'_>) -> Result<ResourceRef, SessionError> {
    match key {
        KeyRef::Str(text) => Ok(ResourceRef::Expr(canonize(text)?.into_owned())),
        KeyRef::Declared(declared) => Ok(ResourceRef::Id(declared.rid)),
    }
}

/// A connection to one peer or router, and the root object of this crate.
///
/// Obtained from [`Session::open`] (TCP, from config) or
/// [`Session::open_with_link`] (any link). The session is single-owner;
/// dropping it stops the background tasks, though [`Session::close`] is
/// the orderly way out.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Opens a session by dialing the configured `connect` endpoint.
    pub async fn open(config: Config) -> Result<Self, SessionError> {
        let resolved = config.resolve()?;
        let endpoint = resolved
            .connect
            .clone()
            .ok_or(SessionError::Config(ConfigError::MissingEndpoint))?;
        let mut addrs = tokio::net::lookup_host(endpoint.as_str())
            .await
            .map_err(LinkError::from)?;
        let addr = addrs
            .next()
            .ok_or_else(|| SessionError::Config(ConfigError::BadEndpoint(endpoint.clone())))?;
        let (tx, rx) = tcp::connect(addr).await?;
        SessionInner::open(resolved, Box::new(tx), Box::new(rx)).await
    }

    /// Opens a session over an already established link.
    ///
    /// Both sides must call this; the handshake exchanges hellos and
    /// fails with [`SessionError::Timeout`] after the configured open
    /// timeout.
    pub async fn open_with_link(
        config: Config,
        tx: BoxedLinkTx,
        rx: BoxedLinkRx,
    ) -> Result<Self, SessionError> {
        SessionInner::open(config.resolve()?, tx, rx).await
    }

    /// This session's identifier.
    pub fn zid(&self) -> PeerId {
        self.inner.zid
    }

    /// Whether the session has been closed or lost its link.
    pub fn is_closed(&self) -> bool {
        !self.inner.open_flag.load(Ordering::Acquire)
    }

    /// Identifiers of this session and everything it is connected to.
    pub async fn info(&self) -> Result<SessionInfo, SessionError> {
        let state = self.inner.state.lock().await;
        state.ensure_open()?;
        let mut info = SessionInfo {
            zid: self.inner.zid,
            peers: Vec::new(),
            routers: Vec::new(),
        };
        if let Some(peer) = &state.peer {
            match peer.whatami {
                WhatAmI::Router => info.routers.push(peer.zid),
                WhatAmI::Peer | WhatAmI::Client => info.peers.push(peer.zid),
            }
        }
        Ok(info)
    }

    /// Closes the session, joining both background tasks.
    ///
    /// Safe to call more than once; later calls are no-ops. Undelivered
    /// handler closures are dropped, never invoked again.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.inner.close().await
    }

    /// Registers `keyexpr` and announces its numeric id to the peer.
    ///
    /// Declaring the same canonical expression again returns the same
    /// id with its reference count bumped.
    pub async fn declare_keyexpr(&self, keyexpr: &str) -> Result<DeclaredKeyExpr, SessionError> {
        let expr = KeyExpr::new(keyexpr)?;
        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;
        let (rid, created) = state.registry.declare(expr.clone());
        if created {
            self.inner.enqueue_wire(Message::DeclareResource {
                id: rid,
                expr: expr.to_string(),
            })?;
        }
        debug!("session {}: declared {} as {}", self.inner.zid, expr, rid);
        Ok(DeclaredKeyExpr {
            session: Arc::downgrade(&self.inner),
            rid,
            expr,
        })
    }

    /// Releases one reference to a declared expression; the peer is told
    /// to forget the id once the last reference goes.
    pub async fn undeclare_keyexpr(&self, keyexpr: DeclaredKeyExpr) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;
        if let Undeclare::Removed(expr) = state.registry.undeclare(keyexpr.rid)? {
            self.inner
                .enqueue_wire(Message::ForgetResource { id: keyexpr.rid })?;
            debug!(
                "session {}: undeclared {} ({})",
                self.inner.zid, expr, keyexpr.rid
            );
        }
        Ok(())
    }

    /// Resolves a resource id back to its key expression, checking
    /// resources the peer declared first, then our own.
    pub async fn resolve(&self, id: ResourceId) -> Result<KeyExpr, SessionError> {
        let state = self.inner.state.lock().await;
        state.ensure_open()?;
        state
            .registry
            .resolve_any(id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    /// Registers a handler for every sample whose key intersects
    /// `keyexpr`.
    pub async fn declare_subscriber<H>(
        &self,
        keyexpr: &str,
        handler: H,
        options: SubscriberOptions,
    ) -> Result<Subscriber, SessionError>
    where
        H: Fn(Sample) + Send + Sync + 'static,
    {
        let expr = KeyExpr::new(keyexpr)?;
        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;
        if state.subscribers.len() >= self.inner.config.limits.subscribers {
            warn!("session {}: subscriber limit reached", self.inner.zid);
            return Err(SessionError::CapacityExceeded("subscriber"));
        }
        let (rid, created) = state.registry.declare(expr.clone());
        if created {
            self.inner.enqueue_wire(Message::DeclareResource {
                id: rid,
                expr: expr.to_string(),
            })?;
        }
        let id = state.next_entity_id();
        let entry = Arc::new(SubscriberEntry::new(
            id,
            rid,
            expr,
            options,
            Box::new(handler),
        ));
        state.subscribers.push(entry.clone());
        debug!(
            "session {}: subscriber {} on {}",
            self.inner.zid, id, entry.expr
        );
        Ok(Subscriber {
            session: Arc::downgrade(&self.inner),
            entry,
        })
    }

    /// Registers a handler answering queries whose selector intersects
    /// `keyexpr`.
    pub async fn declare_queryable<H>(
        &self,
        keyexpr: &str,
        handler: H,
        options: QueryableOptions,
    ) -> Result<Queryable, SessionError>
    where
        H: Fn(Query) + Send + Sync + 'static,
    {
        let expr = KeyExpr::new(keyexpr)?;
        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;
        if state.queryables.len() >= self.inner.config.limits.queryables {
            warn!("session {}: queryable limit reached", self.inner.zid);
            return Err(SessionError::CapacityExceeded("queryable"));
        }
        let (rid, created) = state.registry.declare(expr.clone());
        if created {
            self.inner.enqueue_wire(Message::DeclareResource {
                id: rid,
                expr: expr.to_string(),
            })?;
        }
        let id = state.next_entity_id();
        let entry = Arc::new(QueryableEntry::new(
            id,
            rid,
            expr,
            options,
            Box::new(handler),
        ));
        state.queryables.push(entry.clone());
        debug!(
            "session {}: queryable {} on {}",
            self.inner.zid, id, entry.expr
        );
        Ok(Queryable {
            session: Arc::downgrade(&self.inner),
            entry,
        })
    }

    /// Declares a long-lived writer for `keyexpr`; its samples travel as
    /// the declared resource id.
    pub async fn declare_publisher(
        &self,
        keyexpr: &str,
        options: PublisherOptions,
    ) -> Result<Publisher, SessionError> {
        let expr = KeyExpr::new(keyexpr)?;
        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;
        if state.publishers.len() >= self.inner.config.limits.publishers {
            warn!("session {}: publisher limit reached", self.inner.zid);
            return Err(SessionError::CapacityExceeded("publisher"));
        }
        let (rid, created) = state.registry.declare(expr.clone());
        if created {
            self.inner.enqueue_wire(Message::DeclareResource {
                id: rid,
                expr: expr.to_string(),
            })?;
        }
        let id = state.next_entity_id();
        let entry = Arc::new(PublisherEntry::new(id, rid, expr, options));
        state.publishers.push(entry.clone());
        debug!(
            "session {}: publisher {} on {}",
            self.inner.zid, id, entry.expr
        );
        Ok(Publisher {
            session: Arc::downgrade(&self.inner),
            entry,
        })
    }

    /// Publishes one sample on `keyexpr`.
    pub async fn put<'a>(
        &self,
        keyexpr: impl Into<KeyRef<'a>>,
        payload: impl Into<Bytes>,
        options: PutOptions,
    ) -> Result<(), SessionError> {
        self.inner
            .send_sample(
                keyexpr.into(),
                payload.into(),
                options.encoding,
                SampleKind::Put,
                options.congestion_control,
            )
            .await
    }

    /// Publishes a deletion for `keyexpr`.
    pub async fn delete<'a>(
        &self,
        keyexpr: impl Into<KeyRef<'a>>,
        options: DeleteOptions,
    ) -> Result<(), SessionError> {
        self.inner
            .send_sample(
                keyexpr.into(),
                Bytes::new(),
                Encoding::Empty,
                SampleKind::Delete,
                options.congestion_control,
            )
            .await
    }

    /// Issues a query for `selector` and runs `handler` on every reply
    /// that survives consolidation.
    ///
    /// The query stays open until its timeout; under `latest`
    /// consolidation all replies are delivered at that point, in key
    /// order.
    pub async fn get<'a, H>(
        &self,
        selector: impl Into<KeyRef<'a>>,
        parameters: &str,
        handler: H,
        options: GetOptions,
    ) -> Result<(), SessionError>
    where
        H: Fn(Reply) + Send + Sync + 'static,
    {
        self.inner
            .issue_query(selector.into(), parameters, Arc::new(handler), options)
            .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // orderly close went through close(); this is the abandon path
        if self.inner.open_flag.swap(false, Ordering::AcqRel) {
            debug!("session {} dropped while open", self.inner.zid);
            let _ = self.inner.stop_tx.send(true);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("zid", &self.inner.zid)
            .field("closed", &self.is_closed())
            .finish()
    }
}
