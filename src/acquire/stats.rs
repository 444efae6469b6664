//! Statistics derived from accepted items.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::query::{Term, TermType};

/// Tokens counted for word frequencies.
#[allow(clippy::expect_used)]
static WORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z@#][A-Za-z0-9@#&_]*$").expect("word regex is valid") // Static pattern, safe to panic
});

/// Hours in the volume histogram.
pub const HOURS: usize = 24;

/// Months in the volume histogram.
pub const MONTHS: usize = 12;

/// Items per hour of day (rows) and month of year (columns).
pub type VolumeHistogram = [[u32; MONTHS]; HOURS];

/// Marker printed beside an item in two-term collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextSymbol {
    /// Single-term query, or an item that mentions every term
    Bullet,
    /// Found by the first of two terms
    Club,
    /// Found by the second of two terms
    Spade,
}

impl TextSymbol {
    /// Picks the symbol for an item found by `terms[term_index]`.
    ///
    /// Only hashtag terms can match every term; an item found by a user
    /// term is attributed to that term alone.
    #[must_use]
    pub fn for_item(terms: &[Term], term_index: usize, text: &str) -> Self {
        if terms.len() < 2 {
            return Self::Bullet;
        }
        let found_all = terms
            .get(term_index)
            .is_some_and(|term| term.kind == TermType::Hashtag)
            && {
                let text = text.to_lowercase();
                terms
                    .iter()
                    .all(|term| text.contains(&term.word.to_lowercase()))
            };
        if found_all {
            Self::Bullet
        } else if term_index == 0 {
            Self::Club
        } else {
            Self::Spade
        }
    }
}

/// Splits text into counted words: `@` and `#` start new words, and only
/// tokens longer than one character that look like words, handles or tags
/// survive.
#[must_use]
pub fn word_tokens(text: &str) -> Vec<String> {
    text.replace('@', " @")
        .replace('#', " #")
        .split_whitespace()
        .filter(|word| word.len() > 1 && WORD_PATTERN.is_match(word))
        .map(str::to_string)
        .collect()
}

/// Chronological bounds, posting volume and word frequencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedStats {
    /// Earliest accepted timestamp
    pub earliest: Option<DateTime<Utc>>,
    /// Latest accepted timestamp
    pub latest: Option<DateTime<Utc>>,
    /// Hour-by-month volume
    pub volume: VolumeHistogram,
    /// Word counts, case preserved
    pub word_frequency: BTreeMap<String, u64>,
}

impl Default for DerivedStats {
    fn default() -> Self {
        Self {
            earliest: None,
            latest: None,
            volume: [[0; MONTHS]; HOURS],
            word_frequency: BTreeMap::new(),
        }
    }
}

impl DerivedStats {
    /// Folds one accepted item into the statistics.
    pub fn record(&mut self, timestamp: DateTime<Utc>, text: &str) {
        self.earliest = Some(self.earliest.map_or(timestamp, |e| e.min(timestamp)));
        self.latest = Some(self.latest.map_or(timestamp, |l| l.max(timestamp)));

        let hour = timestamp.hour() as usize;
        let month = timestamp.month0() as usize;
        if let Some(cell) = self.volume.get_mut(hour).and_then(|row| row.get_mut(month)) {
            *cell += 1;
        }

        for word in word_tokens(text) {
            *self.word_frequency.entry(word).or_insert(0) += 1;
        }
    }

    /// Total items recorded in the histogram.
    #[must_use]
    pub fn total_volume(&self) -> u64 {
        self.volume
            .iter()
            .flatten()
            .map(|&count| u64::from(count))
            .sum()
    }
}
