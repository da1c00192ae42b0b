use itertools::Itertools;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::{Context, MultiContext, SingleContext};
use crate::errors::{ContextError, Result};
use crate::kind::Kind;

/// =========================
/// Options
/// =========================

/// What to do when two inputs resolve to the same kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Fail with `ContextError::DuplicateKind`.
    #[default]
    Reject,
    /// Later inputs replace earlier ones.
    LastWriteWins,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub on_duplicate: DuplicatePolicy,
}

/// =========================
/// Public API
/// =========================

/// Combine contexts into one multi context keyed by kind.
///
/// Multi inputs are expanded into their nested entries, everything is flattened
/// left to right and folded into an empty multi context. A kind appearing twice
/// is an error.
pub fn merge<I>(contexts: I) -> Result<MultiContext>
where
    I: IntoIterator,
    I::Item: Into<Context>,
{
    merge_with(contexts, &MergeOptions::default())
}

/// `merge` with an explicit duplicate policy.
pub fn merge_with<I>(contexts: I, opts: &MergeOptions) -> Result<MultiContext>
where
    I: IntoIterator,
    I::Item: Into<Context>,
{
    let singles = contexts
        .into_iter()
        .flat_map(|c| Into::<Context>::into(c).into_singles())
        .collect::<Vec<_>>();

    if opts.on_duplicate == DuplicatePolicy::LastWriteWins {
        for kind in singles.iter().map(SingleContext::kind).duplicates() {
            warn!(%kind, "duplicate context kind, keeping the last one");
        }
    }

    let merged = singles.into_iter().try_fold(MultiContext::new(), |mut acc, ctx| {
        match opts.on_duplicate {
            DuplicatePolicy::Reject => acc.insert(ctx)?,
            DuplicatePolicy::LastWriteWins => {
                acc.replace(ctx);
            }
        }
        Ok::<_, ContextError>(acc)
    })?;

    debug!(kinds = %merged.kinds().join(","), "merged contexts");
    Ok(merged)
}

/// JSON in, JSON out: parse each value as a context and merge them.
pub fn merge_values(values: &[Value]) -> Result<Value> {
    let contexts = values
        .iter()
        .cloned()
        .map(Context::from_value)
        .collect::<Result<Vec<_>>>()?;
    Ok(merge(contexts)?.to_value())
}

/// The context of `kind` inside `ctx`, if it has one.
///
/// A single context matches on its own kind; a multi context is searched by
/// nested entry.
pub fn get_context_kind(kind: &Kind, ctx: &Context) -> Option<SingleContext> {
    match ctx {
        Context::Single(s) if s.kind() == kind => Some(s.clone()),
        Context::Single(_) => None,
        Context::Multi(m) => m.get(kind).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx(v: Value) -> Context {
        Context::from_value(v).unwrap()
    }

    #[test]
    fn single_plus_multi() {
        let out = merge([
            ctx(json!({"kind": "browser", "key": "firefox-100"})),
            ctx(json!({"kind": "multi", "user": {"key": "u1"}, "session": {"key": "s1"}})),
        ])
        .unwrap();
        assert_eq!(
            out.to_value(),
            json!({
                "kind": "multi",
                "browser": {"key": "firefox-100"},
                "user": {"key": "u1"},
                "session": {"key": "s1"},
            })
        );
    }

    #[test]
    fn duplicate_inside_multi_inputs_rejected() {
        let err = merge([
            ctx(json!({"kind": "multi", "user": {"key": "u1"}})),
            ctx(json!({"key": "u2"})),
        ])
        .unwrap_err();
        assert!(matches!(err, ContextError::DuplicateKind { kind } if kind == "user"));
    }

    #[test]
    fn last_write_wins_keeps_position_of_first() {
        let opts = MergeOptions { on_duplicate: DuplicatePolicy::LastWriteWins };
        let out = merge_with(
            [
                ctx(json!({"kind": "user", "key": "u1"})),
                ctx(json!({"kind": "session", "key": "s1"})),
                ctx(json!({"kind": "user", "key": "u2"})),
            ],
            &opts,
        )
        .unwrap();
        assert_eq!(
            serde_json::to_string(&out).unwrap(),
            r#"{"kind":"multi","user":{"key":"u2"},"session":{"key":"s1"}}"#
        );
    }

    #[test]
    fn empty_input_gives_empty_multi() {
        let out = merge(Vec::<Context>::new()).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.to_value(), json!({"kind": "multi"}));
    }

    #[test]
    fn get_kind_from_single_and_multi() {
        let user = ctx(json!({"key": "u1"}));
        assert_eq!(get_context_kind(&Kind::User, &user).unwrap().key(), Some("u1"));
        assert!(get_context_kind(&Kind::Session, &user).is_none());

        let multi = ctx(json!({"kind": "multi", "session": {"key": "s1"}}));
        assert_eq!(get_context_kind(&Kind::Session, &multi).unwrap().key(), Some("s1"));
        assert!(get_context_kind(&Kind::User, &multi).is_none());
    }

    #[test]
    fn merge_values_reports_bad_input() {
        let err = merge_values(&[json!({"kind": false})]).unwrap_err();
        assert!(matches!(err, ContextError::InvalidContext(_)));
    }
}
