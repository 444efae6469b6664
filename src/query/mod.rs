//! Query parsing for content sources.
//!
//! Every entity is addressed by a [`SourceDescriptor`] derived once from a
//! compact query string such as `@alice`, `#sunset` or `@alice+#art`.

mod error;
mod source_words;

pub use error::QueryError;
pub use source_words::{
    MAX_TERMS, SourceDescriptor, Term, TermType, parse, parse_with_default, sanitize_segment,
};
