//! Error types for source-word parsing.

use thiserror::Error;

/// Errors that can occur while parsing a source-word query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The query string was empty or only whitespace
    #[error("invalid query: empty source words\n  Suggestion: Use @name, #tag, or two terms joined by '+'")]
    Empty,

    /// A term was empty once its sigil was stripped
    #[error("invalid query '{raw}': term {position} is empty\n  Suggestion: Remove the stray '+', '@' or '#'")]
    EmptyTerm {
        /// The raw query string
        raw: String,
        /// One-based position of the empty term
        position: usize,
    },

    /// A bare second term followed a term whose type it may not inherit
    #[error(
        "invalid query '{raw}': second term '{word}' has no sigil and cannot follow a hashtag\n  Suggestion: Write '@{word}' or '#{word}'"
    )]
    AmbiguousSecondTerm {
        /// The raw query string
        raw: String,
        /// The bare second word
        word: String,
    },
}

impl QueryError {
    /// Creates an `EmptyTerm` error for the term at a one-based position.
    #[must_use]
    pub fn empty_term(raw: &str, position: usize) -> Self {
        Self::EmptyTerm {
            raw: raw.to_string(),
            position,
        }
    }

    /// Creates an `AmbiguousSecondTerm` error.
    #[must_use]
    pub fn ambiguous_second_term(raw: &str, word: &str) -> Self {
        Self::AmbiguousSecondTerm {
            raw: raw.to_string(),
            word: word.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_empty_term_message() {
        let err = QueryError::empty_term("@alice+", 2);
        let msg = err.to_string();
        assert!(msg.contains("@alice+"));
        assert!(msg.contains("term 2"));
    }

    #[test]
    fn test_query_error_ambiguous_second_term_suggests_sigils() {
        let err = QueryError::ambiguous_second_term("#art+bob", "bob");
        let msg = err.to_string();
        assert!(msg.contains("'@bob'"), "should suggest explicit user sigil");
        assert!(msg.contains("'#bob'"), "should suggest explicit hashtag sigil");
    }
}
