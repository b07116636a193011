use smallvec::SmallVec;

use crate::canon::{DELIMITER, WILD_MANY, WILD_ONE};

type Segments<'a> = SmallVec<[&'a str; 8]>;

fn segments(expr: &str) -> Segments<'_> {
    expr.split(DELIMITER).collect()
}

/// Returns true when every string matched by `b` is also matched by `a`.
///
/// Both inputs are assumed canonical; canonicalize first when in doubt.
pub fn includes(a: &str, b: &str) -> bool {
    incl(&segments(a), &segments(b))
}

/// Returns true when some string is matched by both `a` and `b`.
///
/// Both inputs are assumed canonical; canonicalize first when in doubt.
pub fn intersects(a: &str, b: &str) -> bool {
    inter(&segments(a), &segments(b))
}

// `**` tries to absorb zero segments first and backtracks one segment at a
// time; any split that yields a consistent alignment is accepted. Canonical
// inputs carry no redundant wildcard runs, which keeps branching shallow.
fn incl(a: &[&str], b: &[&str]) -> bool {
    let Some((&a_head, a_tail)) = a.split_first() else {
        // The empty suffix matches only the empty path.
        return b.is_empty();
    };
    if a_head == WILD_MANY {
        return incl(a_tail, b) || (!b.is_empty() && incl(a, &b[1..]));
    }
    let Some((&b_head, b_tail)) = b.split_first() else {
        return false;
    };
    if a_head == WILD_ONE {
        return b_head != WILD_MANY && incl(a_tail, b_tail);
    }
    a_head == b_head && incl(a_tail, b_tail)
}

fn inter(a: &[&str], b: &[&str]) -> bool {
    if a.is_empty() {
        return b.iter().all(|seg| *seg == WILD_MANY);
    }
    if b.is_empty() {
        return a.iter().all(|seg| *seg == WILD_MANY);
    }
    let (a_head, a_tail) = (a[0], &a[1..]);
    let (b_head, b_tail) = (b[0], &b[1..]);
    if a_head == WILD_MANY {
        return inter(a_tail, b) || inter(a, b_tail);
    }
    if b_head == WILD_MANY {
        return inter(a, b_tail) || inter(a_tail, b);
    }
    (a_head == b_head || a_head == WILD_ONE || b_head == WILD_ONE) && inter(a_tail, b_tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_includes_literal_and_single_wildcard() {
        assert!(includes("demo/example/a", "demo/example/a"));
        assert!(!includes("demo/example/a", "demo/example/b"));
        assert!(includes("demo/*/a", "demo/example/a"));
        assert!(!includes("demo/example/a", "demo/*/a"));
        assert!(includes("*/*", "demo/example"));
        assert!(!includes("*/*", "demo/example/a"));
    }

    #[test]
    fn test_includes_multi_wildcard() {
        assert!(includes("demo/example/**", "demo/example/a"));
        assert!(includes("demo/example/**", "demo/example"));
        assert!(includes("demo/example/**", "demo/example/a/b/c"));
        assert!(includes("**", "demo/example"));
        assert!(includes("**", "**"));
        assert!(includes("demo/**/c", "demo/a/b/c"));
        assert!(!includes("demo/example/a", "demo/example/**"));
        assert!(!includes("demo/*", "demo/**"));
        assert!(includes("demo/**", "demo/*/**"));
        assert!(includes("a/**/z", "a/**/m/z"));
    }

    #[test]
    fn test_intersects() {
        assert!(intersects("demo/example/**", "demo/example/a"));
        assert!(intersects("demo/example/a", "demo/example/**"));
        assert!(intersects("demo/*/a", "demo/example/*"));
        assert!(intersects("**", "a/b/c"));
        assert!(intersects("a/**", "**/c"));
        assert!(!intersects("demo/example/a", "demo/example/b"));
        assert!(!intersects("a/b", "a/b/c"));
        assert!(!intersects("a/*", "b/*"));
        assert!(intersects("a/**", "a"));
        assert!(!intersects("a/*", "a"));
    }

    #[test]
    fn test_includes_implies_intersects() {
        let corpus = [
            "demo/example/a",
            "demo/example/**",
            "demo/*/a",
            "demo/**",
            "**",
            "*/example/*",
            "demo/example",
            "a/**/z",
        ];
        for a in corpus {
            for b in corpus {
                if includes(a, b) {
                    assert!(intersects(a, b), "includes({a},{b}) but no intersection");
                }
            }
        }
    }
}
