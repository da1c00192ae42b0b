pub mod errors;
pub mod kind;
pub mod context;
pub mod merge;      // the multi-context fold
pub mod identity;   // service/session/user/... constructors
pub mod client;
pub mod verbosity;

use serde_json::Value;
use errors::Result;

/// Convenience: parse JSON context strings and merge them into one multi context.
pub fn merge_json(contexts: &[&str]) -> Result<Value> {
    let values = contexts
        .iter()
        .map(|s| serde_json::from_str::<Value>(s))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    merge::merge_values(&values)
}

/// Re-export the most-used items for callers that only merge.
pub use context::{Context, MultiContext, SingleContext};
pub use errors::ContextError;
pub use kind::Kind;
pub use merge::{get_context_kind, merge, merge_with, merge_values, DuplicatePolicy, MergeOptions};
