//! cache
//!
//! In-memory caching: the immutable commit-graph snapshot and the bounded
//! FIFO map used for commit-record memoization.

pub mod bounded;
pub mod graph;

pub use bounded::BoundedCache;
pub use graph::{CommitNode, Descendants, PrefixLookup, ReachableFrom, RevCache};
