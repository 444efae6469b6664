//! Source-word grammar: `@name`, `#tag`, and up to two terms joined by `+`.

use serde::{Deserialize, Serialize};
use url::Url;

use super::QueryError;

/// Maximum number of terms kept from a query. Extra terms are dropped.
pub const MAX_TERMS: usize = 2;

/// The kind of a query term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermType {
    /// An account name (`@name`)
    User,
    /// A tag (`#tag`)
    Hashtag,
}

impl TermType {
    /// The sigil written in front of a term of this type.
    #[must_use]
    pub fn sigil(self) -> char {
        match self {
            Self::User => '@',
            Self::Hashtag => '#',
        }
    }

    /// The preposition used in paths and labels: content is `by` a user,
    /// or `for` a hashtag.
    #[must_use]
    pub fn preposition(self) -> &'static str {
        match self {
            Self::User => "by",
            Self::Hashtag => "for",
        }
    }
}

/// A single parsed query term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    /// Term type
    pub kind: TermType,
    /// Term text without its sigil
    pub word: String,
}

impl Term {
    /// Returns the term written with its sigil, e.g. `@alice`.
    #[must_use]
    pub fn display(&self) -> String {
        format!("{}{}", self.kind.sigil(), self.word)
    }
}

/// Normalized form of a query, used to address an entity in logs, on disk,
/// and in display strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Human string for log lines, e.g. `alice and bob`
    pub log_label: String,
    /// Filesystem-safe identifier, e.g. `by_alice_and_for_art`
    pub path_segment: String,
    /// Display header
    pub header: String,
    /// Display label, e.g. `by alice and for art`
    pub label: String,
    /// One to two terms, in query order
    pub terms: Vec<Term>,
}

impl SourceDescriptor {
    /// Term types in query order.
    #[must_use]
    pub fn types(&self) -> Vec<TermType> {
        self.terms.iter().map(|t| t.kind).collect()
    }

    /// Term words in query order.
    #[must_use]
    pub fn words(&self) -> Vec<&str> {
        self.terms.iter().map(|t| t.word.as_str()).collect()
    }

    /// Builds a descriptor addressing a web feed by its URL.
    ///
    /// Feeds are identified by host name: log label, header and path
    /// segment are all the URL host.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Empty`] when the URL cannot be parsed or has no host.
    pub fn for_feed_url(feed_url: &str) -> Result<Self, QueryError> {
        let host = Url::parse(feed_url.trim())
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or(QueryError::Empty)?;
        Ok(Self {
            log_label: host.clone(),
            path_segment: sanitize_segment(&host),
            header: host.clone(),
            label: format!("from {host}"),
            terms: vec![Term {
                kind: TermType::User,
                word: feed_url.trim().to_string(),
            }],
        })
    }

    /// Builds a descriptor for a group identifier (e.g. a Flickr group id).
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Empty`] for a blank identifier.
    pub fn for_group(group_id: &str) -> Result<Self, QueryError> {
        let id = group_id.trim();
        if id.is_empty() {
            return Err(QueryError::Empty);
        }
        Ok(Self {
            log_label: id.to_string(),
            path_segment: sanitize_segment(id),
            header: id.to_string(),
            label: format!("by {id}"),
            terms: vec![Term {
                kind: TermType::User,
                word: id.to_string(),
            }],
        })
    }
}

/// Parses a raw query with bare first terms treated as users.
///
/// # Errors
///
/// See [`parse_with_default`].
pub fn parse(raw: &str) -> Result<SourceDescriptor, QueryError> {
    parse_with_default(raw, TermType::User)
}

/// Parses a raw query, treating a bare first term as `default`.
///
/// A bare second term inherits the first term's type, except after an
/// explicit `#tag`: there its intended type cannot be inferred and the
/// query is rejected. Explicit sigils on the second term are always
/// accepted, so mixed queries such as `#art+@alice` are fine.
///
/// # Errors
///
/// Returns [`QueryError`] when the query is empty, a term is empty, or a
/// bare second term cannot inherit a type.
pub fn parse_with_default(raw: &str, default: TermType) -> Result<SourceDescriptor, QueryError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(QueryError::Empty);
    }

    let mut terms: Vec<Term> = Vec::with_capacity(MAX_TERMS);
    let mut tagged_first = false;
    for (index, piece) in trimmed.split('+').take(MAX_TERMS).enumerate() {
        let piece = piece.trim();
        let (explicit, word) = split_sigil(piece);
        if word.is_empty() {
            return Err(QueryError::empty_term(raw, index + 1));
        }

        let kind = match (explicit, terms.first()) {
            (Some(kind), None) => {
                tagged_first = kind == TermType::Hashtag;
                kind
            }
            (Some(kind), Some(_)) => kind,
            (None, None) => default,
            (None, Some(_)) if tagged_first => {
                return Err(QueryError::ambiguous_second_term(raw, word));
            }
            (None, Some(first)) => first.kind,
        };
        terms.push(Term {
            kind,
            word: word.to_string(),
        });
    }

    Ok(describe(terms))
}

fn split_sigil(piece: &str) -> (Option<TermType>, &str) {
    if let Some(rest) = piece.strip_prefix('@') {
        (Some(TermType::User), rest.trim())
    } else if let Some(rest) = piece.strip_prefix('#') {
        (Some(TermType::Hashtag), rest.trim())
    } else {
        (None, piece)
    }
}

fn describe(terms: Vec<Term>) -> SourceDescriptor {
    let words: Vec<&str> = terms.iter().map(|t| t.word.as_str()).collect();
    let log_label = words.join(" and ");

    let mut path_parts: Vec<String> = Vec::with_capacity(terms.len());
    let mut label_parts: Vec<String> = Vec::with_capacity(terms.len());
    let mut previous: Option<TermType> = None;
    for term in &terms {
        let word = sanitize_segment(&term.word);
        // A repeated preposition is dropped: by_a_and_b, not by_a_and_by_b
        if previous == Some(term.kind) {
            path_parts.push(word);
            label_parts.push(term.word.clone());
        } else {
            path_parts.push(format!("{}_{word}", term.kind.preposition()));
            label_parts.push(format!("{} {}", term.kind.preposition(), term.word));
        }
        previous = Some(term.kind);
    }

    SourceDescriptor {
        header: log_label.clone(),
        log_label,
        path_segment: path_parts.join("_and_"),
        label: label_parts.join(" and "),
        terms,
    }
}

/// Replaces characters that are unsafe in a single path component.
#[must_use]
pub fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
