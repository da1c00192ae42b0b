use flag_context::{merge, Context, ContextError, Kind, MultiContext, SingleContext};
use proptest::prelude::*;
use serde_json::Value;

fn kind_strategy() -> impl Strategy<Value = Kind> {
    prop_oneof![
        Just(Kind::User),
        Just(Kind::Session),
        Just(Kind::Browser),
        Just(Kind::Device),
        Just(Kind::Service),
        Just(Kind::Organization),
        "[a-z]{3,8}_x".prop_map(Kind::Other),
    ]
}

fn single_strategy(kind: Kind) -> impl Strategy<Value = SingleContext> {
    ("[a-z0-9-]{1,12}", proptest::option::of("[A-Za-z ]{0,16}"), any::<bool>()).prop_map(
        move |(key, name, flagged)| {
            let mut ctx = SingleContext::new(kind.clone(), key).unwrap().with("flagged", flagged);
            if let Some(name) = name {
                ctx.set("name", name);
            }
            ctx
        },
    )
}

/// Up to five contexts of pairwise distinct kinds.
fn distinct_contexts() -> impl Strategy<Value = Vec<SingleContext>> {
    proptest::collection::btree_set(kind_strategy(), 1..=5).prop_flat_map(|kinds| {
        kinds.into_iter().map(single_strategy).collect::<Vec<_>>()
    })
}

fn without_kind(ctx: &SingleContext) -> Value {
    let mut v = ctx.to_value();
    v.as_object_mut().unwrap().remove("kind");
    v
}

proptest! {
    #[test]
    fn distinct_kinds_are_all_kept(contexts in distinct_contexts()) {
        let merged = merge(contexts.clone()).unwrap();
        prop_assert_eq!(merged.len(), contexts.len());
        let out = merged.to_value();
        for ctx in &contexts {
            prop_assert_eq!(&out[ctx.kind().as_str()], &without_kind(ctx));
        }
    }

    #[test]
    fn single_input_yields_one_kind(ctx in kind_strategy().prop_flat_map(single_strategy)) {
        let merged = merge([ctx.clone()]).unwrap();
        prop_assert_eq!(merged.kinds().cloned().collect::<Vec<_>>(), vec![ctx.kind().clone()]);
    }

    #[test]
    fn same_kind_twice_fails(
        (a, b) in kind_strategy().prop_flat_map(|k| (single_strategy(k.clone()), single_strategy(k)))
    ) {
        let err = merge([a.clone(), b]).unwrap_err();
        let is_duplicate = matches!(err, ContextError::DuplicateKind { ref kind } if kind == a.kind().as_str());
        prop_assert!(is_duplicate);
    }

    #[test]
    fn remerging_is_the_same_as_merging_once(contexts in distinct_contexts()) {
        let (last, rest) = contexts.split_last().unwrap();
        let partial = merge(rest.to_vec()).unwrap();
        let nested = merge([Context::from(partial), Context::from(last.clone())]).unwrap();
        prop_assert_eq!(nested, merge(contexts.clone()).unwrap());
    }

    #[test]
    fn union_of_disjoint_multis(contexts in distinct_contexts(), split in 0usize..=5) {
        let split = split.min(contexts.len());
        let left = merge(contexts[..split].to_vec()).unwrap();
        let right = merge(contexts[split..].to_vec()).unwrap();
        let union = merge([left, right]).unwrap();
        prop_assert_eq!(union, merge(contexts.clone()).unwrap());
    }

    #[test]
    fn json_round_trip_preserves_merge(contexts in distinct_contexts()) {
        let merged = merge(contexts).unwrap();
        let reparsed = Context::from_value(merged.to_value()).unwrap();
        prop_assert_eq!(reparsed, Context::Multi(merged));
    }
}

#[test]
fn empty_multi_contributes_nothing() {
    let user = SingleContext::new(Kind::User, "u1").unwrap();
    let out = merge([Context::Multi(MultiContext::new()), Context::Single(user.clone())]).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out.get(&Kind::User), Some(&user));
}
