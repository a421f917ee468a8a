//! Inclusion transformation.
//!
//! Given two operations `a` and `b` defined on the same document state,
//! [`transform`] returns `(a', b')` such that applying `a` then `b'` yields
//! the same document as applying `b` then `a'`.
//!
//! Ties between inserts at the same offset are broken by `a_first`: the
//! operation with priority keeps its position, the other one moves behind it.
//! Callers derive the flag from participant ids so every replica orders
//! concurrent inserts identically.

use coedit_proto::Operation;

/// Transform `a` and `b` against each other.
pub fn transform(a: &Operation, b: &Operation, a_first: bool) -> (Operation, Operation) {
    match (a, b) {
        (Operation::Split(a1, a2), _) => {
            let (a1t, b1) = transform(a1, b, a_first);
            let (a2t, b2) = transform(a2, &b1, a_first);
            (Operation::split(a1t, a2t), b2)
        },
        (_, Operation::Split(b1, b2)) => {
            let (a1, b1t) = transform(a, b1, a_first);
            let (a2, b2t) = transform(&a1, b2, a_first);
            (a2, Operation::split(b1t, b2t))
        },
        _ => (include(a, b, a_first), include(b, a, !a_first)),
    }
}

/// Rewrite primitive `a` so it applies after primitive `b`.
fn include(a: &Operation, b: &Operation, a_first: bool) -> Operation {
    match (a, b) {
        (Operation::NoOp, _) => Operation::NoOp,
        (_, Operation::NoOp) => a.clone(),

        (Operation::Insert { offset: pa, text: ta }, Operation::Insert { offset: pb, text: tb }) => {
            if pa < pb || (pa == pb && a_first) {
                a.clone()
            } else {
                Operation::insert(pa + len(tb), ta.clone())
            }
        },

        (Operation::Insert { offset: pa, text: ta }, Operation::Delete { offset: pb, text: tb }) => {
            let lb = len(tb);
            if pa <= pb {
                a.clone()
            } else if *pa >= pb + lb {
                Operation::insert(pa - lb, ta.clone())
            } else {
                // The anchor was deleted; the insert lands where the range was.
                Operation::insert(*pb, ta.clone())
            }
        },

        (Operation::Delete { offset: pa, text: ta }, Operation::Insert { offset: pb, text: tb }) => {
            let (la, lb) = (len(ta), len(tb));
            if pb <= pa {
                Operation::delete(pa + lb, ta.clone())
            } else if *pb >= pa + la {
                a.clone()
            } else {
                // The insert sits inside the range and must survive.
                let cut = pb - pa;
                let head: String = ta.chars().take(cut).collect();
                let tail: String = ta.chars().skip(cut).collect();
                Operation::split(Operation::delete(*pa, head), Operation::delete(pa + lb, tail))
            }
        },

        (Operation::Delete { offset: pa, text: ta }, Operation::Delete { offset: pb, text: tb }) => {
            let (la, lb) = (len(ta), len(tb));
            let b_end = pb + lb;
            if pa + la <= *pb {
                a.clone()
            } else if *pa >= b_end {
                Operation::delete(pa - lb, ta.clone())
            } else {
                let kept: String = ta
                    .chars()
                    .enumerate()
                    .filter(|(i, _)| {
                        let at = pa + i;
                        at < *pb || at >= b_end
                    })
                    .map(|(_, c)| c)
                    .collect();
                if kept.is_empty() {
                    Operation::NoOp
                } else {
                    Operation::delete(*pa.min(pb), kept)
                }
            }
        },

        // Split operands are decomposed by `transform` before reaching here.
        (Operation::Split(..), _) | (_, Operation::Split(..)) => transform(a, b, a_first).0,
    }
}

fn len(text: &str) -> usize {
    text.chars().count()
}
