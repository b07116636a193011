use std::borrow::Cow;

use crate::error::KeyExprError;

/// Segment delimiter within a key expression.
pub const DELIMITER: char = '/';
/// Wildcard segment matching exactly one non-empty segment.
pub const WILD_ONE: &str = "*";
/// Wildcard segment matching zero or more segments.
pub const WILD_MANY: &str = "**";

#[derive(Debug, Clone, Copy)]
enum Segment<'a> {
    Literal(&'a str),
    One,
    Many,
}

fn classify(seg: &str) -> Result<Segment<'_>, KeyExprError> {
    match seg {
        "" => Err(KeyExprError::EmptySegment),
        WILD_ONE => Ok(Segment::One),
        WILD_MANY => Ok(Segment::Many),
        other if other.contains('*') => Err(KeyExprError::StrayWildcard(other.to_string())),
        other => Ok(Segment::Literal(other)),
    }
}

fn push_segment(out: &mut String, seg: &str) {
    if !out.is_empty() {
        out.push(DELIMITER);
    }
    out.push_str(seg);
}

fn flush_run(out: &mut String, stars: &mut usize, many: &mut bool) {
    for _ in 0..*stars {
        push_segment(out, WILD_ONE);
    }
    if *many {
        push_segment(out, WILD_MANY);
    }
    *stars = 0;
    *many = false;
}

/// Canonicalizes `expr`, borrowing the input when it is already canonical.
///
/// A run of wildcard segments containing at least one `**` rewrites to the
/// run's `*` segments followed by a single `**`: `**/**` collapses to `**`
/// and `**/*` becomes `*/**`. Structural faults (empty segments, a wildcard
/// character inside a literal) are errors, never repaired.
pub fn canonize(expr: &str) -> Result<Cow<'_, str>, KeyExprError> {
    if expr.is_empty() {
        return Err(KeyExprError::Empty);
    }

    // Validation pass; also decides whether a rewrite is needed at all.
    let mut needs_rewrite = false;
    let mut after_many = false;
    for seg in expr.split(DELIMITER) {
        match classify(seg)? {
            Segment::Literal(_) => after_many = false,
            Segment::One => needs_rewrite |= after_many,
            Segment::Many => {
                needs_rewrite |= after_many;
                after_many = true;
            }
        }
    }
    if !needs_rewrite {
        return Ok(Cow::Borrowed(expr));
    }

    let mut out = String::with_capacity(expr.len());
    let mut stars = 0usize;
    let mut many = false;
    for seg in expr.split(DELIMITER) {
        match classify(seg)? {
            Segment::One => stars += 1,
            Segment::Many => many = true,
            Segment::Literal(lit) => {
                flush_run(&mut out, &mut stars, &mut many);
                push_segment(&mut out, lit);
            }
        }
    }
    flush_run(&mut out, &mut stars, &mut many);
    Ok(Cow::Owned(out))
}

/// Returns true when `expr` is already in canonical form.
///
/// Expressions that fail to canonicalize are not canonical.
pub fn is_canon(expr: &str) -> bool {
    matches!(canonize(expr), Ok(Cow::Borrowed(_)))
}
