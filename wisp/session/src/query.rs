//! Outgoing queries and reply consolidation

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use wisp_keyexpr::KeyExpr;
use wisp_link::{QueryTarget, Timestamp};

use crate::sample::Sample;

/// How replies from multiple queryables are deduplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consolidation {
    /// Pick a policy from the query target: `Latest` for
    /// [`QueryTarget::BestMatching`], `None` when the target admits
    /// several equally valid answers.
    #[default]
    Auto,
    /// Forward every reply as it arrives.
    None,
    /// Forward a reply only if it is newer than anything already
    /// forwarded for the same key.
    Monotonic,
    /// Buffer everything and deliver only the newest reply per key when
    /// the query finalizes.
    Latest,
}

/// A [`Consolidation`] with `Auto` resolved away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsolidationMode {
    None,
    Monotonic,
    Latest,
}

impl Consolidation {
    pub(crate) fn resolve(self, target: QueryTarget) -> ConsolidationMode {
        match self {
            Consolidation::Auto => match target {
                QueryTarget::BestMatching => ConsolidationMode::Latest,
                QueryTarget::All | QueryTarget::AllComplete => ConsolidationMode::None,
            },
            Consolidation::None => ConsolidationMode::None,
            Consolidation::Monotonic => ConsolidationMode::Monotonic,
            Consolidation::Latest => ConsolidationMode::Latest,
        }
    }
}

/// Options accepted by [`Session::get`](crate::Session::get).
#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    /// Which queryables may answer.
    pub target: QueryTarget,
    /// Reply deduplication policy.
    pub consolidation: Consolidation,
    /// How long the query stays open.
    pub timeout: Duration,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            target: QueryTarget::default(),
            consolidation: Consolidation::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Application-level failure carried in a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyError {
    /// Error payload produced by the queryable.
    pub payload: Bytes,
}

impl std::fmt::Display for ReplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.payload) {
            Ok(text) => f.write_str(text),
            Err(_) => write!(f, "{} bytes", self.payload.len()),
        }
    }
}

/// One answer to a query, delivered to the reply handler passed to
/// [`Session::get`](crate::Session::get).
#[derive(Debug, Clone)]
pub struct Reply {
    /// The replied value, or the error the queryable signalled.
    pub result: Result<Sample, ReplyError>,
}

pub(crate) type ReplyHandler = Arc<dyn Fn(Reply) + Send + Sync>;

/// Book-keeping for one outstanding query.
///
/// Owned by the session state map; `offer` decides the fate of each
/// arriving reply under the resolved consolidation mode, `finalize`
/// hands back whatever `latest` buffered. Error replies carry no key or
/// timestamp and bypass consolidation in every mode.
pub(crate) struct PendingQuery {
    expr: KeyExpr,
    mode: ConsolidationMode,
    handler: ReplyHandler,
    /// Newest timestamp already forwarded per key, `monotonic` only.
    forwarded: HashMap<String, Timestamp>,
    /// Newest reply per key, `latest` only; ordered for a stable flush.
    buffered: BTreeMap<String, Reply>,
}

impl PendingQuery {
    pub(crate) fn new(expr: KeyExpr, mode: ConsolidationMode, handler: ReplyHandler) -> Self {
        Self {
            expr,
            mode,
            handler,
            forwarded: HashMap::new(),
            buffered: BTreeMap::new(),
        }
    }

    /// The selector this query was issued with.
    pub(crate) fn expr(&self) -> &KeyExpr {
        &self.expr
    }

    pub(crate) fn handler(&self) -> ReplyHandler {
        Arc::clone(&self.handler)
    }

    /// Applies the consolidation mode to one reply.
    ///
    /// Returns the reply when it should reach the handler now; `latest`
    /// always returns `None` and keeps its verdicts for `finalize`.
    pub(crate) fn offer(&mut self, reply: Reply) -> Option<Reply> {
        let sample = match &reply.result {
            Ok(sample) => sample,
            Err(_) => return Some(reply),
        };
        match self.mode {
            ConsolidationMode::None => Some(reply),
            ConsolidationMode::Monotonic => {
                let key = sample.keyexpr.as_str();
                let stale = self
                    .forwarded
                    .get(key)
                    .map_or(false, |&seen| sample.timestamp <= seen);
                if stale {
                    return None;
                }
                self.forwarded.insert(key.to_string(), sample.timestamp);
                Some(reply)
            }
            ConsolidationMode::Latest => {
                let key = sample.keyexpr.as_str().to_string();
                let stale = self
                    .buffered
                    .get(&key)
                    .and_then(|held| held.result.as_ref().ok())
                    .map_or(false, |held| sample.timestamp <= held.timestamp);
                if !stale {
                    self.buffered.insert(key, reply);
                }
                None
            }
        }
    }

    /// Consumes the entry, yielding the handler and any buffered replies
    /// in key order.
    pub(crate) fn finalize(self) -> (ReplyHandler, Vec<Reply>) {
        (self.handler, self.buffered.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_link::{Encoding, SampleKind};

    fn pending(mode: ConsolidationMode) -> PendingQuery {
        PendingQuery::new(
            KeyExpr::new("demo/**").unwrap(),
            mode,
            Arc::new(|_reply| {}),
        )
    }

    fn ok_reply(key: &str, stamp: u64) -> Reply {
        Reply {
            result: Ok(Sample {
                keyexpr: KeyExpr::new(key).unwrap(),
                payload: Bytes::from_static(b"v"),
                encoding: Encoding::Empty,
                kind: SampleKind::Put,
                timestamp: Timestamp(stamp),
            }),
        }
    }

    fn err_reply() -> Reply {
        Reply {
            result: Err(ReplyError {
                payload: Bytes::from_static(b"boom"),
            }),
        }
    }

    fn stamp_of(reply: &Reply) -> u64 {
        reply.result.as_ref().unwrap().timestamp.0
    }

    #[test]
    fn auto_resolves_by_target() {
        assert_eq!(
            Consolidation::Auto.resolve(QueryTarget::BestMatching),
            ConsolidationMode::Latest
        );
        assert_eq!(
            Consolidation::Auto.resolve(QueryTarget::All),
            ConsolidationMode::None
        );
        assert_eq!(
            Consolidation::Auto.resolve(QueryTarget::AllComplete),
            ConsolidationMode::None
        );
        assert_eq!(
            Consolidation::Monotonic.resolve(QueryTarget::BestMatching),
            ConsolidationMode::Monotonic
        );
    }

    #[test]
    fn none_forwards_everything() {
        let mut pending = pending(ConsolidationMode::None);
        assert!(pending.offer(ok_reply("demo/a", 5)).is_some());
        assert!(pending.offer(ok_reply("demo/a", 5)).is_some());
        assert!(pending.offer(ok_reply("demo/a", 1)).is_some());
        let (_, flushed) = pending.finalize();
        assert!(flushed.is_empty());
    }

    #[test]
    fn monotonic_drops_stale_per_key() {
        let mut pending = pending(ConsolidationMode::Monotonic);
        assert!(pending.offer(ok_reply("demo/a", 5)).is_some());
        assert!(pending.offer(ok_reply("demo/a", 5)).is_none());
        assert!(pending.offer(ok_reply("demo/a", 3)).is_none());
        assert!(pending.offer(ok_reply("demo/a", 7)).is_some());
        // other keys have their own high-water mark
        assert!(pending.offer(ok_reply("demo/b", 1)).is_some());
    }

    #[test]
    fn latest_buffers_newest_per_key() {
        let mut pending = pending(ConsolidationMode::Latest);
        assert!(pending.offer(ok_reply("demo/b", 2)).is_none());
        assert!(pending.offer(ok_reply("demo/a", 5)).is_none());
        assert!(pending.offer(ok_reply("demo/a", 9)).is_none());
        assert!(pending.offer(ok_reply("demo/a", 7)).is_none());
        let (_, flushed) = pending.finalize();
        assert_eq!(flushed.len(), 2);
        // flushed in key order, newest stamp kept
        assert_eq!(stamp_of(&flushed[0]), 9);
        assert_eq!(stamp_of(&flushed[1]), 2);
    }

    #[test]
    fn errors_bypass_consolidation() {
        let mut pending = pending(ConsolidationMode::Latest);
        assert!(pending.offer(err_reply()).is_some());
        assert!(pending.offer(ok_reply("demo/a", 1)).is_none());
        let (_, flushed) = pending.finalize();
        assert_eq!(flushed.len(), 1);
    }
}
