//! Numeric resource id registry
//!
//! Declared key expressions get a session-scoped numeric id so that later
//! wire messages can carry the small id instead of the full expression.
//! Local and remote declarations live in separate tables: ids are only
//! meaningful relative to the session that allocated them.

use std::collections::HashMap;

use wisp_keyexpr::KeyExpr;
use wisp_link::ResourceId;

use crate::error::SessionError;

struct LocalResource {
    expr: KeyExpr,
    refs: usize,
}

/// Outcome of dropping one reference to a local resource.
pub(crate) enum Undeclare {
    /// Other declarations still use the id.
    Retained,
    /// The last reference is gone; the mapping was removed.
    Removed(KeyExpr),
}

/// Bidirectional id <-> key expression tables for one session.
#[derive(Default)]
pub(crate) struct ResourceRegistry {
    next_id: u32,
    local: HashMap<ResourceId, LocalResource>,
    by_expr: HashMap<KeyExpr, ResourceId>,
    remote: HashMap<ResourceId, KeyExpr>,
}

impl ResourceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Declares `expr` locally, reusing the existing id when the same
    /// canonical expression is already declared.
    ///
    /// Returns the id and whether the mapping is new. Ids are allocated
    /// from a monotonic counter and never reused within a session.
    pub(crate) fn declare(&mut self, expr: KeyExpr) -> (ResourceId, bool) {
        if let Some(&id) = self.by_expr.get(&expr) {
            if let Some(resource) = self.local.get_mut(&id) {
                resource.refs += 1;
            }
            return (id, false);
        }
        self.next_id += 1;
        let id = ResourceId(self.next_id);
        self.by_expr.insert(expr.clone(), id);
        self.local.insert(id, LocalResource { expr, refs: 1 });
        (id, true)
    }

    /// Drops one reference to a local id.
    pub(crate) fn undeclare(&mut self, id: ResourceId) -> Result<Undeclare, SessionError> {
        let resource = self.local.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        resource.refs -= 1;
        if resource.refs > 0 {
            return Ok(Undeclare::Retained);
        }
        let resource = self.local.remove(&id).ok_or(SessionError::NotFound(id))?;
        self.by_expr.remove(&resource.expr);
        Ok(Undeclare::Removed(resource.expr))
    }

    /// Records a resource declared by the peer.
    pub(crate) fn insert_remote(&mut self, id: ResourceId, expr: KeyExpr) {
        self.remote.insert(id, expr);
    }

    /// Forgets a resource declared by the peer.
    pub(crate) fn remove_remote(&mut self, id: ResourceId) -> bool {
        self.remote.remove(&id).is_some()
    }

    pub(crate) fn resolve_local(&self, id: ResourceId) -> Option<&KeyExpr> {
        self.local.get(&id).map(|resource| &resource.expr)
    }

    pub(crate) fn resolve_remote(&self, id: ResourceId) -> Option<&KeyExpr> {
        self.remote.get(&id)
    }

    /// Resolves an id from either table, remote first.
    ///
    /// Messages from the peer carry the peer's ids, loopback messages
    /// carry ours; a lookup that tries both serves the public
    /// [`resolve`](crate::Session::resolve) surface.
    pub(crate) fn resolve_any(&self, id: ResourceId) -> Option<&KeyExpr> {
        self.remote.get(&id).or_else(|| self.resolve_local(id))
    }

    pub(crate) fn clear(&mut self) {
        self.local.clear();
        self.by_expr.clear();
        self.remote.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(s: &str) -> KeyExpr {
        KeyExpr::new(s).unwrap()
    }

    #[test]
    fn declare_allocates_then_reuses() {
        let mut registry = ResourceRegistry::new();
        let (a, created_a) = registry.declare(expr("demo/a"));
        let (b, created_b) = registry.declare(expr("demo/b"));
        let (a2, created_a2) = registry.declare(expr("demo/a"));
        assert!(created_a && created_b);
        assert!(!created_a2);
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn undeclare_refcounts() {
        let mut registry = ResourceRegistry::new();
        let (id, _) = registry.declare(expr("demo/a"));
        let (_, _) = registry.declare(expr("demo/a"));
        assert!(matches!(registry.undeclare(id), Ok(Undeclare::Retained)));
        assert!(registry.resolve_local(id).is_some());
        assert!(matches!(registry.undeclare(id), Ok(Undeclare::Removed(_))));
        assert!(registry.resolve_local(id).is_none());
        assert!(matches!(
            registry.undeclare(id),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn ids_never_reused() {
        let mut registry = ResourceRegistry::new();
        let (first, _) = registry.declare(expr("demo/a"));
        assert!(matches!(
            registry.undeclare(first),
            Ok(Undeclare::Removed(_))
        ));
        let (second, _) = registry.declare(expr("demo/a"));
        assert_ne!(first, second);
    }

    #[test]
    fn remote_table_is_separate() {
        let mut registry = ResourceRegistry::new();
        let (local, _) = registry.declare(expr("demo/local"));
        registry.insert_remote(local, expr("demo/remote"));
        assert_eq!(registry.resolve_local(local).unwrap().as_str(), "demo/local");
        assert_eq!(
            registry.resolve_remote(local).unwrap().as_str(),
            "demo/remote"
        );
        assert_eq!(registry.resolve_any(local).unwrap().as_str(), "demo/remote");
        assert!(registry.remove_remote(local));
        assert!(!registry.remove_remote(local));
        assert_eq!(registry.resolve_any(local).unwrap().as_str(), "demo/local");
    }
}
