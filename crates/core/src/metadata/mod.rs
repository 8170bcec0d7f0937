//! Structured metadata (statements and captions) and the duplicate-path merge.

mod merge;
mod types;

pub use merge::{merge_statements, MergeResult};
pub use types::*;
