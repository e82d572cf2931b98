//! Query parsing for filename search.
//!
//! A raw query string is tokenized into name matchers (words, quoted
//! phrases, wildcard patterns) and structured filter tokens (`provider:`,
//! `status:`, `size:`, `date:`). Each filter token is validated on its own:
//! a malformed one becomes a parse warning attached to the result instead
//! of failing the whole query.

mod date;
mod parser;
mod size;
mod text;

pub use date::DatePredicate;
pub use parser::{
    Matcher, MatcherKind, ParseWarning, ProviderFilter, SearchQuery, SortSpec, StatusFilter,
};
pub use size::SizePredicate;
pub use text::{fold, has_wildcards, wildcard_match};
