//! Persisted acquisition state and the per-page filtering that updates it.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::merge::{dedup_by_id, sort_chronologically, sort_reverse_chronologically};
use super::stats::{DerivedStats, TextSymbol};
use crate::platform::{Page, Record};
use crate::query::Term;

/// Days past today that still count as valid creation dates.
pub const PLATFORM_STOP_SLACK_DAYS: i64 = 2;

/// Inclusive date window items must fall in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Earliest accepted day
    pub start: Option<NaiveDate>,
    /// Latest accepted day
    pub stop: Option<NaiveDate>,
}

impl Window {
    /// A window from `start` to `stop`, both inclusive.
    #[must_use]
    pub fn new(start: Option<NaiveDate>, stop: Option<NaiveDate>) -> Self {
        Self { start, stop }
    }
}

/// Date and length limits applied to every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFilter {
    /// Items dated after this day are bogus
    pub platform_stop: NaiveDate,
    /// Items dated before this day are bogus
    pub platform_start: Option<NaiveDate>,
    /// Configured window
    pub window: Window,
    /// Items accepted per term before the term is done
    pub per_term_cap: Option<usize>,
    /// Pages arrive newest first, so an item before the window start means
    /// every later page is older still
    pub newest_first: bool,
}

impl PageFilter {
    /// Builds a filter for a run starting at `now`, splitting `max_length`
    /// evenly across `n_terms`.
    #[must_use]
    pub fn new(
        now: DateTime<Utc>,
        platform_start: Option<DateTime<Utc>>,
        window: Window,
        max_length: Option<usize>,
        n_terms: usize,
    ) -> Self {
        Self {
            platform_stop: (now + Duration::days(PLATFORM_STOP_SLACK_DAYS)).date_naive(),
            platform_start: platform_start.map(|start| start.date_naive()),
            window,
            per_term_cap: max_length.map(|max| (max / n_terms.max(1)).max(1)),
            newest_first: true,
        }
    }

    /// Sets whether the paginator serves pages newest first.
    #[must_use]
    pub fn newest_first(mut self, newest_first: bool) -> Self {
        self.newest_first = newest_first;
        self
    }
}

/// Pagination progress of one query term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermProgress<C> {
    /// The term
    pub term: Term,
    /// Where the next page starts
    pub cursor: C,
    /// Still has pages to fetch
    pub active: bool,
    /// Pages fetched
    pub pages: u32,
    /// Items accepted from this term
    pub accepted: usize,
    /// Ids of the last page, to detect a repeated page
    #[serde(default)]
    pub last_page_ids: BTreeSet<String>,
    /// Total the platform claims exists for this term
    pub expected_total: Option<u64>,
}

impl<C: Default> TermProgress<C> {
    /// Fresh progress for a term.
    #[must_use]
    pub fn new(term: Term) -> Self {
        Self {
            term,
            cursor: C::default(),
            active: true,
            pages: 0,
            accepted: 0,
            last_page_ids: BTreeSet::new(),
            expected_total: None,
        }
    }
}

/// Counts of items the filters turned away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCounts {
    /// After the platform stop date
    pub after_platform_stop: u64,
    /// Before the platform start date
    pub before_platform_start: u64,
    /// After the configured stop date
    pub after_window_stop: u64,
    /// Before the configured start date
    pub before_window_start: u64,
    /// Already collected
    pub duplicates: u64,
}

impl FilterCounts {
    fn add(&mut self, other: Self) {
        self.after_platform_stop += other.after_platform_stop;
        self.before_platform_start += other.before_platform_start;
        self.after_window_stop += other.after_window_stop;
        self.before_window_start += other.before_window_start;
        self.duplicates += other.duplicates;
    }
}

/// What one page did to the state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageReport {
    /// Items fetched
    pub fetched: usize,
    /// Items accepted
    pub accepted: usize,
    /// Items filtered out, by reason
    pub filtered: FilterCounts,
    /// The page repeated the previous page for this term
    pub repeated: bool,
    /// The term has no more pages
    pub term_done: bool,
}

/// Everything collected for one source, resumable from disk.
///
/// `item_ids` is not persisted; it is rebuilt from `items` on load so every
/// id indexes exactly one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionState<I, C> {
    /// Per-term progress, in query order
    pub terms: Vec<TermProgress<C>>,
    /// Accepted items; newest-page order while running, oldest first once
    /// complete
    pub items: Vec<I>,
    #[serde(skip)]
    item_ids: HashSet<String>,
    /// Per-item symbol for two-term queries
    #[serde(default)]
    pub text_symbols: BTreeMap<String, TextSymbol>,
    /// Bounds, volume and word frequencies
    pub derived_stats: DerivedStats,
    /// Running totals of filtered items
    #[serde(default)]
    pub filtered: FilterCounts,
    /// The run finished; resume is a no-op
    pub content_complete: bool,
}

impl<I: Record, C: Clone + Default> AcquisitionState<I, C> {
    /// Fresh state for the given terms.
    #[must_use]
    pub fn new(terms: &[Term]) -> Self {
        Self {
            terms: terms.iter().cloned().map(TermProgress::new).collect(),
            items: Vec::new(),
            item_ids: HashSet::new(),
            text_symbols: BTreeMap::new(),
            derived_stats: DerivedStats::default(),
            filtered: FilterCounts::default(),
            content_complete: false,
        }
    }

    /// Rebuilds the id index after loading, dropping any duplicate items.
    /// Returns the number of duplicates dropped.
    pub fn rebuild_index(&mut self) -> usize {
        let dropped = dedup_by_id(&mut self.items);
        self.item_ids = self.items.iter().map(|i| i.id().to_string()).collect();
        dropped
    }

    /// Whether an item with this id was accepted.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.item_ids.contains(id)
    }

    /// Number of distinct ids accepted.
    #[must_use]
    pub fn id_count(&self) -> usize {
        self.item_ids.len()
    }

    /// Indices of terms that still have pages, in query order.
    #[must_use]
    pub fn active_terms(&self) -> Vec<usize> {
        self.terms
            .iter()
            .enumerate()
            .filter(|(_, progress)| progress.active)
            .map(|(index, _)| index)
            .collect()
    }

    /// Sum of the platform's claimed totals, when any term reported one.
    #[must_use]
    pub fn expected_total(&self) -> Option<u64> {
        let totals: Vec<u64> = self.terms.iter().filter_map(|t| t.expected_total).collect();
        (!totals.is_empty()).then(|| totals.iter().sum())
    }

    /// Applies one fetched page to the term at `index`.
    ///
    /// Items are filtered newest first. The first item before the window
    /// start ends the term and the rest of the page is ignored, since
    /// everything after it is older still. Items already accepted from the
    /// page are kept.
    pub fn apply_page(&mut self, index: usize, page: Page<I, C>, filter: &PageFilter) -> PageReport {
        let all_terms: Vec<Term> = self.terms.iter().map(|t| t.term.clone()).collect();
        let mut report = PageReport {
            fetched: page.items.len(),
            ..PageReport::default()
        };
        let Some(progress) = self.terms.get_mut(index) else {
            return report;
        };

        progress.pages += 1;
        if let Some(total) = page.expected_total {
            progress.expected_total = Some(progress.expected_total.map_or(total, |t| t.max(total)));
        }

        let page_ids: BTreeSet<String> = page.items.iter().map(|i| i.id().to_string()).collect();
        if !page_ids.is_empty() && page_ids == progress.last_page_ids {
            progress.active = false;
            report.repeated = true;
            report.term_done = true;
            return report;
        }
        progress.last_page_ids = page_ids;
        progress.cursor = page.next_cursor;

        let mut items = page.items;
        sort_reverse_chronologically(&mut items);

        for item in items {
            let day = item.timestamp().date_naive();
            if day > filter.platform_stop {
                report.filtered.after_platform_stop += 1;
                continue;
            }
            if filter.platform_start.is_some_and(|start| day < start) {
                report.filtered.before_platform_start += 1;
                continue;
            }
            if filter.window.stop.is_some_and(|stop| day > stop) {
                report.filtered.after_window_stop += 1;
                continue;
            }
            if filter.window.start.is_some_and(|start| day < start) {
                report.filtered.before_window_start += 1;
                if !filter.newest_first {
                    continue;
                }
                progress.active = false;
                break;
            }
            if filter.per_term_cap.is_some_and(|cap| progress.accepted >= cap) {
                progress.active = false;
                break;
            }
            if !self.item_ids.insert(item.id().to_string()) {
                report.filtered.duplicates += 1;
                continue;
            }

            if all_terms.len() > 1 {
                self.text_symbols.insert(
                    item.id().to_string(),
                    TextSymbol::for_item(&all_terms, index, item.text()),
                );
            }
            self.derived_stats.record(item.timestamp(), item.text());
            self.items.push(item);
            progress.accepted += 1;
            report.accepted += 1;
        }

        if page.exhausted || filter.per_term_cap.is_some_and(|cap| progress.accepted >= cap) {
            progress.active = false;
        }
        report.term_done = !progress.active;
        self.filtered.add(report.filtered);
        report
    }

    /// Marks the run complete and orders items oldest first.
    pub fn finish(&mut self) {
        for progress in &mut self.terms {
            progress.active = false;
        }
        sort_chronologically(&mut self.items);
        self.content_complete = true;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::media::MediaReference;
    use crate::query::TermType;
    use chrono::TimeZone;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Post {
        id: String,
        at: DateTime<Utc>,
        #[serde(default)]
        media: Vec<MediaReference>,
    }

    impl Record for Post {
        fn id(&self) -> &str {
            &self.id
        }
        fn timestamp(&self) -> DateTime<Utc> {
            self.at
        }
        fn text(&self) -> &str {
            "word"
        }
        fn media(&self) -> &[MediaReference] {
            &self.media
        }
        fn media_mut(&mut self) -> &mut [MediaReference] {
            &mut self.media
        }
    }

    fn post(id: &str, y: i32, m: u32, d: u32) -> Post {
        Post {
            id: id.to_string(),
            at: Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
            media: Vec::new(),
        }
    }

    fn terms(n: usize) -> Vec<Term> {
        ["a", "b"]
            .iter()
            .take(n)
            .map(|w| Term {
                kind: TermType::User,
                word: (*w).to_string(),
            })
            .collect()
    }

    fn open_filter() -> PageFilter {
        PageFilter::new(
            Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap(),
            None,
            Window::default(),
            None,
            1,
        )
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ==================== Filter Tests ====================

    #[test]
    fn test_page_filter_cap_and_platform_stop() {
        let filter = PageFilter::new(
            Utc.with_ymd_and_hms(2021, 6, 1, 23, 0, 0).unwrap(),
            None,
            Window::default(),
            Some(5),
            2,
        );
        assert_eq!(filter.platform_stop, day(2021, 6, 3));
        assert_eq!(filter.per_term_cap, Some(2));
    }

    #[test]
    fn test_window_start_ends_term_and_keeps_newer_items() {
        let mut state: AcquisitionState<Post, u32> = AcquisitionState::new(&terms(1));
        let mut filter = open_filter();
        filter.window = Window::new(Some(day(2020, 1, 2)), Some(day(2020, 1, 12)));

        let page = Page::more(
            vec![
                post("3", 2020, 1, 1),
                post("1", 2020, 1, 10),
                post("5", 2019, 12, 20),
                post("2", 2020, 1, 5),
                post("4", 2019, 12, 29),
            ],
            1,
        );
        let report = state.apply_page(0, page, &filter);

        let ids: Vec<&str> = state.items.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(report.term_done);
        assert_eq!(report.filtered.before_window_start, 1);
        assert!(state.active_terms().is_empty());
    }

    #[test]
    fn test_window_start_skips_items_when_pages_are_unordered() {
        let mut state: AcquisitionState<Post, u32> = AcquisitionState::new(&terms(1));
        let mut filter = open_filter().newest_first(false);
        filter.window = Window::new(Some(day(2015, 1, 1)), None);

        let old = Page::more(vec![post("old", 2010, 1, 1)], 1);
        let report = state.apply_page(0, old, &filter);
        assert!(!report.term_done);
        assert_eq!(report.filtered.before_window_start, 1);

        let newer = Page::last(vec![post("new", 2020, 6, 1), post("older", 2012, 3, 3)], 2);
        let report = state.apply_page(0, newer, &filter);

        let ids: Vec<&str> = state.items.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["new"]);
        assert_eq!(report.filtered.before_window_start, 1);
        assert_eq!(state.filtered.before_window_start, 2);
        assert!(report.term_done);
    }

    #[test]
    fn test_platform_bounds_skip_without_ending_term() {
        let mut state: AcquisitionState<Post, u32> = AcquisitionState::new(&terms(1));
        let mut filter = open_filter();
        filter.platform_start = Some(day(2006, 7, 13));

        let page = Page::more(
            vec![post("future", 2030, 1, 1), post("ok", 2020, 1, 1), post("ancient", 2001, 1, 1)],
            1,
        );
        let report = state.apply_page(0, page, &filter);

        assert_eq!(report.accepted, 1);
        assert_eq!(report.filtered.after_platform_stop, 1);
        assert_eq!(report.filtered.before_platform_start, 1);
        assert!(!report.term_done);
    }

    // ==================== Dedup Tests ====================

    #[test]
    fn test_duplicates_counted_not_accepted() {
        let mut state: AcquisitionState<Post, u32> = AcquisitionState::new(&terms(1));
        let filter = open_filter();
        state.apply_page(0, Page::more(vec![post("1", 2020, 1, 2)], 1), &filter);
        let report = state.apply_page(
            0,
            Page::more(vec![post("1", 2020, 1, 2), post("2", 2020, 1, 1)], 2),
            &filter,
        );
        assert_eq!(report.filtered.duplicates, 1);
        assert_eq!(state.items.len(), 2);
        assert_eq!(state.id_count(), 2);
    }

    #[test]
    fn test_repeated_page_is_terminal() {
        let mut state: AcquisitionState<Post, u32> = AcquisitionState::new(&terms(1));
        let filter = open_filter();
        let page = || Page::more(vec![post("1", 2020, 1, 2), post("2", 2020, 1, 1)], 1);
        state.apply_page(0, page(), &filter);
        let report = state.apply_page(0, page(), &filter);
        assert!(report.repeated);
        assert!(report.term_done);
        assert_eq!(state.items.len(), 2);
    }

    #[test]
    fn test_rebuild_index_after_deserialize() {
        let mut state: AcquisitionState<Post, u32> = AcquisitionState::new(&terms(1));
        state.apply_page(0, Page::more(vec![post("1", 2020, 1, 2)], 1), &open_filter());
        let json = serde_json::to_string(&state).unwrap();

        let mut loaded: AcquisitionState<Post, u32> = serde_json::from_str(&json).unwrap();
        assert!(!loaded.contains("1"));
        assert_eq!(loaded.rebuild_index(), 0);
        assert!(loaded.contains("1"));
    }

    // ==================== Cap and Finish Tests ====================

    #[test]
    fn test_per_term_cap_stops_term() {
        let mut state: AcquisitionState<Post, u32> = AcquisitionState::new(&terms(1));
        let mut filter = open_filter();
        filter.per_term_cap = Some(2);
        let report = state.apply_page(
            0,
            Page::more(
                vec![post("1", 2020, 1, 3), post("2", 2020, 1, 2), post("3", 2020, 1, 1)],
                1,
            ),
            &filter,
        );
        assert_eq!(report.accepted, 2);
        assert!(report.term_done);
    }

    #[test]
    fn test_two_terms_record_symbols() {
        let mut state: AcquisitionState<Post, u32> = AcquisitionState::new(&terms(2));
        let filter = open_filter();
        state.apply_page(0, Page::last(vec![post("1", 2020, 1, 3)], 1), &filter);
        state.apply_page(1, Page::last(vec![post("2", 2020, 1, 2)], 1), &filter);
        assert_eq!(state.text_symbols["1"], TextSymbol::Club);
        assert_eq!(state.text_symbols["2"], TextSymbol::Spade);
    }

    #[test]
    fn test_finish_sorts_oldest_first() {
        let mut state: AcquisitionState<Post, u32> = AcquisitionState::new(&terms(2));
        let filter = open_filter();
        state.apply_page(0, Page::more(vec![post("a", 2020, 3, 1)], 1), &filter);
        state.apply_page(1, Page::more(vec![post("b", 2020, 1, 1)], 1), &filter);
        state.finish();
        assert!(state.content_complete);
        assert_eq!(state.items[0].id, "b");
        assert!(state.active_terms().is_empty());
    }

    #[test]
    fn test_expected_total_sums_reporting_terms() {
        let mut state: AcquisitionState<Post, u32> = AcquisitionState::new(&terms(2));
        assert_eq!(state.expected_total(), None);
        state.apply_page(
            0,
            Page::more(vec![post("a", 2020, 3, 1)], 1).with_expected_total(Some(40)),
            &open_filter(),
        );
        assert_eq!(state.expected_total(), Some(40));
    }
}
