//! Query execution and ranking over the index snapshot.

mod engine;
mod rank;

pub use engine::{SearchEngine, SearchOptions, SearchResults, SearchTask};
pub use rank::MatchQuality;
