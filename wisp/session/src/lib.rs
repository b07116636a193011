//! Session engine for wisp: declarations, publication, queries and the
//! background machinery that keeps one link to a peer or router alive.
//!
//! # Features
//!
//! - **Sessions**: open over TCP or any [`wisp_link`] link, with a hello
//!   handshake, lease keep-alives and orderly close
//! - **Declarations**: key expressions with numeric ids, subscribers,
//!   publishers and queryables, all reference-counted in a per-session
//!   registry
//! - **Data plane**: put/delete with loopback delivery, so local
//!   subscribers observe local publications
//! - **Queries**: timeout-bounded get with `none`/`monotonic`/`latest`
//!   reply consolidation
//! - **Scouting**: sessionless multicast discovery of peers and routers
//!
//! ```no_run
//! use wisp_session::{keys, Config, PutOptions, Session, SubscriberOptions};
//!
//! # async fn run() -> Result<(), wisp_session::SessionError> {
//! let mut config = Config::new();
//! config.insert(keys::CONNECT, "tcp/127.0.0.1:7447")?;
//! let session = Session::open(config).await?;
//! let subscriber = session
//!     .declare_subscriber(
//!         "demo/example/**",
//!         |sample| println!("{} = {:?}", sample.keyexpr, sample.payload),
//!         SubscriberOptions::default(),
//!     )
//!     .await?;
//! session.put("demo/example/a", "hello", PutOptions::default()).await?;
//! subscriber.undeclare().await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod error;
mod publisher;
mod query;
mod queryable;
mod registry;
mod runtime;
mod sample;
mod scout;
mod session;
mod subscriber;

pub use config::{keys, Config, ConfigError, ScoutConfig};
pub use error::SessionError;
pub use publisher::{CongestionControl, DeleteOptions, Publisher, PublisherOptions, PutOptions};
pub use query::{Consolidation, GetOptions, Reply, ReplyError};
pub use queryable::{Query, Queryable, QueryableOptions, ReplyOptions};
pub use sample::Sample;
pub use scout::{scout, scout_with};
pub use session::{DeclaredKeyExpr, KeyRef, Session, SessionInfo};
pub use subscriber::{Reliability, Subscriber, SubscriberOptions};

pub use wisp_keyexpr::{KeyExpr, KeyExprError};
pub use wisp_link::{
    Encoding, Hello, PeerId, QueryTarget, ResourceId, SampleKind, Timestamp, WhatAmI,
    WhatAmIMatcher,
};
