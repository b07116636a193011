use thiserror::Error;

/// Errors surfaced while validating or canonicalizing a key expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyExprError {
    /// The expression contains no segments at all.
    #[error("empty key expression")]
    Empty,
    /// A leading, trailing or doubled delimiter produced an empty segment.
    #[error("empty segment in key expression")]
    EmptySegment,
    /// A literal segment contains a bare wildcard character.
    #[error("stray wildcard in segment `{0}`")]
    StrayWildcard(String),
}
