use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;

use crate::canon::canonize;
use crate::error::KeyExprError;
use crate::matching;

/// An owned, canonical key expression.
///
/// Construction canonicalizes, so two `KeyExpr` values denote the same
/// matched set exactly when they compare equal. Clones share the backing
/// text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyExpr(Arc<str>);

impl KeyExpr {
    /// Canonicalizes `expr` into an owned key expression.
    pub fn new(expr: impl AsRef<str>) -> Result<Self, KeyExprError> {
        let canonical = canonize(expr.as_ref())?;
        Ok(KeyExpr(Arc::from(canonical.as_ref())))
    }

    /// The canonical text of this expression.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when every string matched by `other` is also matched by `self`.
    pub fn includes(&self, other: &KeyExpr) -> bool {
        matching::includes(&self.0, &other.0)
    }

    /// True when some string is matched by both expressions.
    pub fn intersects(&self, other: &KeyExpr) -> bool {
        matching::intersects(&self.0, &other.0)
    }

    /// Matched-set equality. Canonical form is unique per matched set, so
    /// this is textual equality.
    pub fn equals(&self, other: &KeyExpr) -> bool {
        self == other
    }
}

impl fmt::Display for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for KeyExpr {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for KeyExpr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for KeyExpr {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for KeyExpr {
    type Error = KeyExprError;

    fn try_from(expr: &str) -> Result<Self, Self::Error> {
        KeyExpr::new(expr)
    }
}

impl TryFrom<String> for KeyExpr {
    type Error = KeyExprError;

    fn try_from(expr: String) -> Result<Self, Self::Error> {
        KeyExpr::new(expr)
    }
}

impl FromStr for KeyExpr {
    type Err = KeyExprError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        KeyExpr::new(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_canonicalizes() {
        let ke = KeyExpr::new("demo/**/**/a").unwrap();
        assert_eq!(ke.as_str(), "demo/**/a");
        assert_eq!(KeyExpr::new("demo/example/**/*").unwrap().as_str(), "demo/example/*/**");
    }

    #[test]
    fn test_new_rejects_malformed() {
        assert!(KeyExpr::new("").is_err());
        assert!(KeyExpr::new("demo//a").is_err());
        assert!(KeyExpr::new("demo/a*").is_err());
    }

    #[test]
    fn test_set_equality_is_textual() {
        let a = KeyExpr::new("demo/example/**").unwrap();
        let b = KeyExpr::new("demo/example").unwrap();
        let c = KeyExpr::new("demo/**/**/example").unwrap();
        let d = KeyExpr::new("demo/**/example").unwrap();
        assert!(!a.equals(&b));
        assert!(c.equals(&d));
    }

    #[test]
    fn test_algebra_through_type() {
        let wide: KeyExpr = "demo/example/**".parse().unwrap();
        let narrow: KeyExpr = "demo/example/a".parse().unwrap();
        assert!(wide.includes(&narrow));
        assert!(wide.intersects(&narrow));
        assert!(!narrow.includes(&wide));
    }
}
