//! Deduplication and chronological ordering of collected records.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::platform::Record;

/// Orders ids numerically when both are integers, otherwise lexically,
/// so `"9"` sorts before `"10"`.
#[must_use]
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Oldest-first ordering, ties broken by id.
pub fn chronological<R: Record>(a: &R, b: &R) -> Ordering {
    a.timestamp()
        .cmp(&b.timestamp())
        .then_with(|| compare_ids(a.id(), b.id()))
}

/// Sorts records oldest first.
pub fn sort_chronologically<R: Record>(items: &mut [R]) {
    items.sort_by(chronological);
}

/// Sorts records newest first, the order pages are filtered in.
pub fn sort_reverse_chronologically<R: Record>(items: &mut [R]) {
    items.sort_by(|a, b| chronological(b, a));
}

/// Keeps the first record of each id, preserving order. Returns the number
/// of records dropped.
pub fn dedup_by_id<R: Record>(items: &mut Vec<R>) -> usize {
    let before = items.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    items.retain(|item| seen.insert(item.id().to_string()));
    before - items.len()
}
