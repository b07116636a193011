//! Key-expression algebra for wisp.
//!
//! A key expression is a `/`-separated path in which a segment is either a
//! literal, `*` (exactly one segment) or `**` (any number of segments,
//! including none). This crate implements the pure algebra over such
//! expressions: canonicalization, inclusion, intersection and set equality.
//! It performs no I/O and holds no shared state.
//!
//! # Example
//!
//! ```rust
//! use wisp_keyexpr::KeyExpr;
//!
//! let wide = KeyExpr::new("demo/example/**").unwrap();
//! let narrow = KeyExpr::new("demo/example/a").unwrap();
//! assert!(wide.includes(&narrow));
//! assert!(wide.intersects(&narrow));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod canon;
mod error;
mod expr;
mod matching;

pub use canon::{canonize, is_canon, DELIMITER, WILD_MANY, WILD_ONE};
pub use error::KeyExprError;
pub use expr::KeyExpr;
pub use matching::{includes, intersects};
