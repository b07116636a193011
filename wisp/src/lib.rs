//! Lightweight pub/sub and query/reply messaging for constrained devices.
//!
//! wisp lets a process declare named resources (key expressions), publish
//! samples, subscribe to matching samples, answer and issue queries, and
//! discover peers and routers, over a single link to a peer or router.
//!
//! The crate is a thin facade over three layers:
//!
//! - [`wisp_keyexpr`]: the key expression algebra (canonicalization,
//!   inclusion, intersection), pure and I/O-free
//! - [`wisp_link`]: the wire message model, frame codec and concrete
//!   links (TCP, in-memory, UDP scouting)
//! - [`wisp_session`]: sessions, declarations, query consolidation and
//!   the background read/lease tasks
//!
//! # Example
//!
//! ```no_run
//! use wisp::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let mut config = Config::new();
//!     config.insert(keys::CONNECT, "tcp/127.0.0.1:7447")?;
//!     let session = Session::open(config).await?;
//!
//!     let subscriber = session
//!         .declare_subscriber(
//!             "demo/example/**",
//!             |sample| println!(">> {} = {:?}", sample.keyexpr, sample.payload),
//!             SubscriberOptions::default(),
//!         )
//!         .await?;
//!
//!     session
//!         .put("demo/example/hi", "hello", PutOptions::default())
//!         .await?;
//!
//!     subscriber.undeclare().await?;
//!     session.close().await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use wisp_keyexpr::{canonize, includes, intersects, is_canon, KeyExpr, KeyExprError};
pub use wisp_link::{
    Encoding, Hello, LinkError, PeerId, QueryTarget, ResourceId, SampleKind, Timestamp, WhatAmI,
    WhatAmIMatcher,
};
pub use wisp_session::{
    keys, scout, scout_with, Config, ConfigError, CongestionControl, Consolidation,
    DeclaredKeyExpr, DeleteOptions, GetOptions, KeyRef, Publisher, PublisherOptions, PutOptions,
    Query, Queryable, QueryableOptions, Reliability, Reply, ReplyError, ReplyOptions, Sample,
    ScoutConfig, Session, SessionError, SessionInfo, Subscriber, SubscriberOptions,
};

/// One-stop import for applications.
pub mod prelude {
    pub use crate::{
        keys, Config, Consolidation, GetOptions, KeyExpr, PublisherOptions, PutOptions,
        QueryTarget, QueryableOptions, Reply, ReplyOptions, Sample, SampleKind, Session,
        SessionError, SubscriberOptions, WhatAmI, WhatAmIMatcher,
    };
}
