//! Time-cursor pagination shared by tag feeds (Tumblr tagged, Instagram tags).
//!
//! Tag feeds never say when they are done: they keep serving older posts
//! from the same handful of blogs. A feed is finished once two pages in a
//! row bring no blog or account we have not already seen, or a page is
//! empty, or the time cursor stops moving backward.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive pages without a new host before a feed counts as exhausted.
pub const STAGNANT_PAGE_LIMIT: u32 = 2;

/// Position in a tag feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFeedCursor {
    /// Request items strictly before this unix time
    pub before: Option<i64>,
    /// Host identities (blog names, account names) seen so far
    pub seen_hosts: BTreeSet<String>,
    /// Pages in a row that brought no new host
    pub stagnant_pages: u32,
}

impl TagFeedCursor {
    /// Computes the cursor after a page of `(timestamp, host)` pairs, and
    /// whether the feed is exhausted.
    pub(crate) fn advance<'a, I>(&self, page: I) -> (Self, bool)
    where
        I: IntoIterator<Item = (DateTime<Utc>, &'a str)>,
    {
        let mut next = self.clone();
        let mut earliest: Option<i64> = None;
        let mut new_hosts = 0_usize;

        for (timestamp, host) in page {
            let ts = timestamp.timestamp();
            earliest = Some(earliest.map_or(ts, |e| e.min(ts)));
            if next.seen_hosts.insert(host.to_string()) {
                new_hosts += 1;
            }
        }

        let Some(earliest) = earliest else {
            return (next, true);
        };

        next.stagnant_pages = if new_hosts == 0 {
            self.stagnant_pages + 1
        } else {
            0
        };
        let stalled = self.before.is_some_and(|before| earliest >= before);
        next.before = Some(earliest);

        let exhausted = stalled || next.stagnant_pages >= STAGNANT_PAGE_LIMIT;
        (next, exhausted)
    }
}
