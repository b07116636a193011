//! Background tasks driving an open session
//!
//! The read task is the single dispatch site: every handler invocation,
//! whether triggered by the peer or by this process's own loopback
//! traffic, happens on it. The lease task is the single link writer: it
//! drains the outbound queue, emits keep-alives and enforces the peer
//! lease. Either task hitting a link error tears the session down and
//! stops the other through the shared stop signal.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};
use wisp_keyexpr::KeyExpr;
use wisp_link::{
    BoxedLinkRx, BoxedLinkTx, Encoding, Message, QueryId, QueryTarget, ReplyBody, ResourceId,
    ResourceRef, SampleKind, Timestamp,
};

use bytes::Bytes;

use crate::query::{Reply, ReplyError, ReplyHandler};
use crate::queryable::Query;
use crate::sample::Sample;
use crate::session::{SessionInner, State};

/// Where a dispatched message entered the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Loopback from this session's own operations.
    Local,
    /// Received from the connected peer.
    Peer,
}

/// Drains the link and the loopback queue into the dispatch table.
pub(crate) async fn read_task(
    inner: Arc<SessionInner>,
    mut link: BoxedLinkRx,
    mut loopback: mpsc::UnboundedReceiver<Message>,
    mut stop: watch::Receiver<bool>,
) {
    debug!("session {}: read task started", inner.zid);
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            Some(message) = loopback.recv() => {
                dispatch(&inner, message, Origin::Local).await;
            }
            received = link.recv() => match received {
                Ok(message) => {
                    inner.touch();
                    dispatch(&inner, message, Origin::Peer).await;
                }
                Err(err) => {
                    inner.connection_lost(&format!("recv failed: {err}")).await;
                    break;
                }
            },
        }
    }
    debug!("session {}: read task stopped", inner.zid);
}

/// Owns the link writer: queued messages, keep-alives and the lease check.
pub(crate) async fn lease_task(
    inner: Arc<SessionInner>,
    mut link: BoxedLinkTx,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    mut stop: watch::Receiver<bool>,
) {
    debug!(
        "session {}: lease task started, keep-alive every {:?}",
        inner.zid, inner.config.keepalive
    );
    let mut keepalive = tokio::time::interval(inner.config.keepalive);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            Some(message) = outbound.recv() => {
                if let Err(err) = link.send(&message).await {
                    inner.connection_lost(&format!("send failed: {err}")).await;
                    break;
                }
            }
            _ = keepalive.tick() => {
                if inner.silence() >= inner.config.lease_timeout {
                    inner.connection_lost("lease expired").await;
                    break;
                }
                if let Err(err) = link.send(&Message::KeepAlive).await {
                    inner.connection_lost(&format!("keep-alive failed: {err}")).await;
                    break;
                }
            }
        }
    }
    if let Err(err) = link.close().await {
        debug!("session {}: link close: {}", inner.zid, err);
    }
    debug!("session {}: lease task stopped", inner.zid);
}

async fn dispatch(inner: &Arc<SessionInner>, message: Message, origin: Origin) {
    match message {
        Message::DeclareResource { id, expr } => on_declare(inner, id, expr).await,
        Message::ForgetResource { id } => on_forget(inner, id).await,
        Message::Sample {
            resource,
            kind,
            encoding,
            timestamp,
            payload,
        } => on_sample(inner, resource, kind, encoding, timestamp, payload, origin).await,
        Message::Query {
            id,
            resource,
            parameters,
            target,
        } => on_query(inner, id, resource, parameters, target, origin).await,
        Message::Reply { id, body } => on_reply(inner, id, body).await,
        Message::KeepAlive => trace!("session {}: keep-alive", inner.zid),
        Message::Hello(hello) => {
            debug!("session {}: ignoring hello from {}", inner.zid, hello.zid)
        }
        Message::Scout { .. } => {
            debug!("session {}: ignoring scout on session link", inner.zid)
        }
    }
}

/// Resolves a wire resource reference to a key expression.
///
/// Id references resolve against the table matching where the message
/// came from: the peer speaks in ids it declared, loopback in ours.
fn resolve_resource(state: &State, resource: &ResourceRef, origin: Origin) -> Option<KeyExpr> {
    match resource {
        ResourceRef::Expr(expr) => KeyExpr::new(expr).ok(),
        ResourceRef::Id(id) => match origin {
            Origin::Local => state.registry.resolve_local(*id).cloned(),
            Origin::Peer => state.registry.resolve_remote(*id).cloned(),
        },
    }
}

// declarations only arrive from the peer; local ones are applied
// synchronously by the declare calls
async fn on_declare(inner: &Arc<SessionInner>, id: ResourceId, expr: String) {
    let parsed = match KeyExpr::new(&expr) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(
                "session {}: peer declared malformed `{}`: {}",
                inner.zid, expr, err
            );
            return;
        }
    };
    let mut state = inner.state.lock().await;
    state.registry.insert_remote(id, parsed);
    debug!("session {}: peer declared {} as {}", inner.zid, expr, id);
}

async fn on_forget(inner: &Arc<SessionInner>, id: ResourceId) {
    let mut state = inner.state.lock().await;
    if state.registry.remove_remote(id) {
        debug!("session {}: peer forgot {}", inner.zid, id);
    } else {
        debug!("session {}: peer forgot unknown {}", inner.zid, id);
    }
}

async fn on_sample(
    inner: &Arc<SessionInner>,
    resource: ResourceRef,
    kind: SampleKind,
    encoding: Encoding,
    timestamp: Timestamp,
    payload: Bytes,
    origin: Origin,
) {
    let (keyexpr, targets) = {
        let state = inner.state.lock().await;
        let Some(keyexpr) = resolve_resource(&state, &resource, origin) else {
            debug!(
                "session {}: dropping sample for unresolved {}",
                inner.zid, resource
            );
            return;
        };
        let targets: Vec<_> = state
            .subscribers
            .iter()
            .filter(|entry| entry.expr.intersects(&keyexpr))
            .cloned()
            .collect();
        (keyexpr, targets)
    };
    if targets.is_empty() {
        return;
    }
    let sample = Sample {
        keyexpr,
        payload,
        encoding,
        kind,
        timestamp,
    };
    // handlers run without the state lock so they may enqueue freely
    for entry in targets {
        entry.invoke(&sample).await;
    }
}

async fn on_query(
    inner: &Arc<SessionInner>,
    id: QueryId,
    resource: ResourceRef,
    parameters: String,
    target: QueryTarget,
    origin: Origin,
) {
    let (keyexpr, targets) = {
        let state = inner.state.lock().await;
        let Some(keyexpr) = resolve_resource(&state, &resource, origin) else {
            debug!(
                "session {}: dropping query for unresolved {}",
                inner.zid, resource
            );
            return;
        };
        let targets: Vec<_> = state
            .queryables
            .iter()
            .filter(|entry| entry.expr.intersects(&keyexpr))
            .filter(|entry| target != QueryTarget::AllComplete || entry.options.complete)
            .cloned()
            .collect();
        (keyexpr, targets)
    };
    for entry in targets {
        let query = Query {
            id,
            keyexpr: keyexpr.clone(),
            parameters: parameters.clone(),
            origin,
            session: Arc::downgrade(inner),
        };
        entry.invoke(query).await;
    }
}

async fn on_reply(inner: &Arc<SessionInner>, id: QueryId, body: ReplyBody) {
    let reply = match body {
        ReplyBody::Ok {
            keyexpr,
            encoding,
            timestamp,
            payload,
        } => match KeyExpr::new(&keyexpr) {
            Ok(keyexpr) => Reply {
                result: Ok(Sample {
                    keyexpr,
                    payload,
                    encoding,
                    kind: SampleKind::Put,
                    timestamp,
                }),
            },
            Err(err) => {
                debug!(
                    "session {}: dropping reply with malformed key `{}`: {}",
                    inner.zid, keyexpr, err
                );
                return;
            }
        },
        ReplyBody::Err { payload } => Reply {
            result: Err(ReplyError { payload }),
        },
    };
    let forwarded = {
        let mut state = inner.state.lock().await;
        let Some(pending) = state.queries.get_mut(&id) else {
            debug!("session {}: late reply for query {}", inner.zid, id);
            return;
        };
        if let Ok(sample) = &reply.result {
            if !pending.expr().intersects(&sample.keyexpr) {
                debug!(
                    "session {}: reply {} outside selector {}",
                    inner.zid,
                    sample.keyexpr,
                    pending.expr()
                );
                return;
            }
        }
        pending.offer(reply).map(|accepted| (pending.handler(), accepted))
    };
    if let Some((handler, reply)) = forwarded {
        invoke_reply(&handler, reply);
    }
}

/// Runs a reply handler, containing panics like subscriber dispatch does.
pub(crate) fn invoke_reply(handler: &ReplyHandler, reply: Reply) {
    if catch_unwind(AssertUnwindSafe(|| handler(reply))).is_err() {
        warn!("reply handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;
    use crate::config::{keys, Config};
    use crate::error::SessionError;
    use crate::publisher::{PublisherOptions, PutOptions};
    use crate::query::{Consolidation, GetOptions};
    use crate::queryable::{QueryableOptions, ReplyOptions};
    use crate::session::Session;
    use crate::subscriber::SubscriberOptions;
    use wisp_link::{mem, Hello, LinkTx, PeerId, WhatAmI};

    async fn open_pair() -> (Session, Session) {
        let ((a_tx, a_rx), (b_tx, b_rx)) = mem::pair();
        let (a, b) = tokio::join!(
            Session::open_with_link(Config::new(), Box::new(a_tx), Box::new(a_rx)),
            Session::open_with_link(Config::new(), Box::new(b_tx), Box::new(b_rx)),
        );
        (a.unwrap(), b.unwrap())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn samples_cross_the_link() {
        let (a, b) = open_pair().await;
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = b
            .declare_subscriber(
                "demo/example/**",
                move |sample| {
                    sink.lock().unwrap().push((
                        sample.keyexpr.to_string(),
                        sample.payload.clone(),
                        sample.kind,
                    ));
                },
                SubscriberOptions::default(),
            )
            .await
            .unwrap();

        a.put("demo/example/a", "one", PutOptions::default())
            .await
            .unwrap();
        a.delete("demo/example/a", Default::default()).await.unwrap();
        settle().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "demo/example/a");
        assert_eq!(seen[0].2, SampleKind::Put);
        assert_eq!(seen[1].2, SampleKind::Delete);
        drop(seen);
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_follows_publish_order() {
        let (a, b) = open_pair().await;
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = b
            .declare_subscriber(
                "demo/ordered",
                move |sample| {
                    let text = String::from_utf8_lossy(&sample.payload).into_owned();
                    sink.lock().unwrap().push(text.parse::<u32>().unwrap());
                },
                SubscriberOptions::default(),
            )
            .await
            .unwrap();

        for index in 0..20u32 {
            a.put("demo/ordered", index.to_string(), PutOptions::default())
                .await
                .unwrap();
        }
        settle().await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..20).collect::<Vec<u32>>());
        drop(seen);
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn declared_resources_resolve_remotely() {
        let (a, b) = open_pair().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        let _sub = b
            .declare_subscriber(
                "demo/**",
                move |sample| {
                    assert_eq!(sample.keyexpr.as_str(), "demo/temperature");
                    sink.fetch_add(1, AtomicOrdering::SeqCst);
                },
                SubscriberOptions::default(),
            )
            .await
            .unwrap();

        let declared = a.declare_keyexpr("demo/temperature").await.unwrap();
        a.put(&declared, "21.5", PutOptions::default()).await.unwrap();
        settle().await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);

        // publishers ride the same id machinery
        let publisher = a
            .declare_publisher("demo/temperature", PublisherOptions::default())
            .await
            .unwrap();
        publisher.put("22.0").await.unwrap();
        settle().await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 2);

        publisher.undeclare().await.unwrap();
        a.undeclare_keyexpr(declared).await.unwrap();
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_without_consolidation_delivers_every_reply() {
        let (a, b) = open_pair().await;
        for value in ["first", "second"] {
            b.declare_queryable(
                "demo/**",
                move |query| {
                    query
                        .reply("demo/result", value, ReplyOptions::default())
                        .unwrap();
                },
                QueryableOptions::default(),
            )
            .await
            .unwrap();
        }

        let replies = Arc::new(StdMutex::new(Vec::new()));
        let sink = replies.clone();
        a.get(
            "demo/**",
            "",
            move |reply| {
                let sample = reply.result.unwrap();
                sink.lock().unwrap().push(sample.payload.clone());
            },
            GetOptions {
                consolidation: Consolidation::None,
                timeout: Duration::from_millis(300),
                ..GetOptions::default()
            },
        )
        .await
        .unwrap();

        settle().await;
        assert_eq!(replies.lock().unwrap().len(), 2);
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn local_queries_are_answered_over_loopback() {
        let (a, b) = open_pair().await;
        a.declare_queryable(
            "demo/**",
            move |query| {
                query
                    .reply("demo/local", "from this side", ReplyOptions::default())
                    .unwrap();
            },
            QueryableOptions::default(),
        )
        .await
        .unwrap();

        let replies = Arc::new(StdMutex::new(Vec::new()));
        let sink = replies.clone();
        a.get(
            "demo/**",
            "",
            move |reply| {
                let sample = reply.result.unwrap();
                sink.lock()
                    .unwrap()
                    .push((sample.keyexpr.to_string(), sample.payload.clone()));
            },
            GetOptions {
                consolidation: Consolidation::None,
                timeout: Duration::from_millis(200),
                ..GetOptions::default()
            },
        )
        .await
        .unwrap();

        settle().await;
        let replies = replies.lock().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, "demo/local");
        assert_eq!(replies[0].1, Bytes::from_static(b"from this side"));
        drop(replies);
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn get_with_latest_delivers_newest_after_timeout() {
        let (a, b) = open_pair().await;
        for value in ["first", "second"] {
            b.declare_queryable(
                "demo/**",
                move |query| {
                    query
                        .reply("demo/result", value, ReplyOptions::default())
                        .unwrap();
                },
                QueryableOptions::default(),
            )
            .await
            .unwrap();
        }

        let replies = Arc::new(StdMutex::new(Vec::new()));
        let sink = replies.clone();
        a.get(
            "demo/**",
            "",
            move |reply| {
                let sample = reply.result.unwrap();
                sink.lock().unwrap().push(sample.payload.clone());
            },
            GetOptions {
                consolidation: Consolidation::Latest,
                timeout: Duration::from_millis(200),
                ..GetOptions::default()
            },
        )
        .await
        .unwrap();

        // nothing before the window closes
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(replies.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let replies = replies.lock().unwrap();
        // both queryables answered the same key; the newer stamp wins
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0], Bytes::from_static(b"second"));
        drop(replies);
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn all_complete_skips_incomplete_queryables() {
        let (a, b) = open_pair().await;
        b.declare_queryable(
            "demo/**",
            move |query| {
                query
                    .reply("demo/partial", "partial", ReplyOptions::default())
                    .unwrap();
            },
            QueryableOptions { complete: false },
        )
        .await
        .unwrap();
        b.declare_queryable(
            "demo/**",
            move |query| {
                query
                    .reply("demo/full", "full", ReplyOptions::default())
                    .unwrap();
            },
            QueryableOptions { complete: true },
        )
        .await
        .unwrap();

        let replies = Arc::new(StdMutex::new(Vec::new()));
        let sink = replies.clone();
        a.get(
            "demo/**",
            "",
            move |reply| {
                let sample = reply.result.unwrap();
                sink.lock().unwrap().push(sample.keyexpr.to_string());
            },
            GetOptions {
                target: QueryTarget::AllComplete,
                consolidation: Consolidation::None,
                timeout: Duration::from_millis(200),
            },
        )
        .await
        .unwrap();

        settle().await;
        assert_eq!(replies.lock().unwrap().as_slice(), ["demo/full"]);
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn queryable_errors_reach_the_caller() {
        let (a, b) = open_pair().await;
        b.declare_queryable(
            "demo/**",
            move |query| {
                query.reply_err("not ready").unwrap();
            },
            QueryableOptions::default(),
        )
        .await
        .unwrap();

        let failures = Arc::new(AtomicUsize::new(0));
        let sink = failures.clone();
        a.get(
            "demo/**",
            "",
            move |reply| {
                assert_eq!(
                    reply.result.unwrap_err().payload,
                    Bytes::from_static(b"not ready")
                );
                sink.fetch_add(1, AtomicOrdering::SeqCst);
            },
            GetOptions {
                consolidation: Consolidation::Latest,
                timeout: Duration::from_millis(200),
                ..GetOptions::default()
            },
        )
        .await
        .unwrap();

        settle().await;
        // errors bypass consolidation, even under latest
        assert_eq!(failures.load(AtomicOrdering::SeqCst), 1);
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_dispatch() {
        let (a, b) = open_pair().await;
        let _bad = b
            .declare_subscriber(
                "demo/**",
                |_sample| panic!("boom"),
                SubscriberOptions::default(),
            )
            .await
            .unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        let _good = b
            .declare_subscriber(
                "demo/**",
                move |_sample| {
                    sink.fetch_add(1, AtomicOrdering::SeqCst);
                },
                SubscriberOptions::default(),
            )
            .await
            .unwrap();

        a.put("demo/a", "x", PutOptions::default()).await.unwrap();
        a.put("demo/a", "y", PutOptions::default()).await.unwrap();
        settle().await;

        assert_eq!(hits.load(AtomicOrdering::SeqCst), 2);
        assert!(!b.is_closed());
        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn keepalives_keep_an_idle_session_alive() {
        let mut a_config = Config::new();
        a_config.insert(keys::LEASE_TIMEOUT, "300").unwrap();
        a_config.insert(keys::LEASE_KEEPALIVE, "75").unwrap();
        let mut b_config = Config::new();
        b_config.insert(keys::LEASE_TIMEOUT, "300").unwrap();
        b_config.insert(keys::LEASE_KEEPALIVE, "75").unwrap();

        let ((a_tx, a_rx), (b_tx, b_rx)) = mem::pair();
        let (a, b) = tokio::join!(
            Session::open_with_link(a_config, Box::new(a_tx), Box::new(a_rx)),
            Session::open_with_link(b_config, Box::new(b_tx), Box::new(b_rx)),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        // three lease windows with no application traffic
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(!a.is_closed());
        assert!(!b.is_closed());

        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        let _sub = b
            .declare_subscriber(
                "demo/alive",
                move |_sample| {
                    sink.fetch_add(1, AtomicOrdering::SeqCst);
                },
                SubscriberOptions::default(),
            )
            .await
            .unwrap();
        a.put("demo/alive", "still here", PutOptions::default())
            .await
            .unwrap();
        settle().await;
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);

        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn lease_expiry_tears_the_session_down() {
        let mut config = Config::new();
        config.insert(keys::LEASE_TIMEOUT, "200").unwrap();
        config.insert(keys::LEASE_KEEPALIVE, "50").unwrap();

        let ((a_tx, a_rx), (mut b_tx, b_rx)) = mem::pair();
        let handshake = async {
            b_tx.send(&Message::Hello(Hello {
                zid: PeerId::random(),
                whatami: WhatAmI::Peer,
                locators: Vec::new(),
            }))
            .await
            .unwrap();
        };
        let (session, _) = tokio::join!(
            Session::open_with_link(config, Box::new(a_tx), Box::new(a_rx)),
            handshake,
        );
        let session = session.unwrap();
        assert!(!session.is_closed());

        // the fake peer stays silent but keeps its end alive
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(session.is_closed());
        assert!(matches!(
            session.put("demo/a", "x", PutOptions::default()).await,
            Err(SessionError::SessionClosed)
        ));
        drop(b_tx);
        drop(b_rx);
    }

    #[tokio::test]
    async fn peer_disconnect_is_detected() {
        let (a, b) = open_pair().await;
        b.close().await.unwrap();
        settle().await;
        assert!(a.is_closed());
        a.close().await.unwrap();
    }
}
