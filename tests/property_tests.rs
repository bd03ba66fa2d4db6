//! Property tests for the pure cache structures.
//!
//! These exercise the bounded FIFO cache against a reference model and
//! the short-prefix machinery of the revision cache on synthetic graphs,
//! no external tool involved.

use std::collections::BTreeMap;

use proptest::prelude::*;

use gitstore::cache::{BoundedCache, PrefixLookup, RevCache};
use gitstore::core::types::Rev;

fn rev_strategy() -> impl Strategy<Value = Rev> {
    "[0-9a-f]{40}".prop_map(|s| Rev::new(s).unwrap())
}

/// Distinct revisions arranged as a linear chain, newest first.
fn linear_cache(revs: &[Rev]) -> RevCache {
    let refs = BTreeMap::from([(
        "refs/heads/main".to_string(),
        revs.first().cloned().expect("non-empty"),
    )]);
    let listing = revs
        .iter()
        .enumerate()
        .map(|(i, rev)| (rev.clone(), revs.get(i + 1).cloned().into_iter().collect()))
        .collect();
    RevCache::build(refs, listing)
}

proptest! {
    #[test]
    fn shorten_resolve_round_trip(
        revs in proptest::collection::hash_set(rev_strategy(), 1..32),
        min in 4usize..12,
    ) {
        let revs: Vec<Rev> = revs.into_iter().collect();
        let cache = linear_cache(&revs);
        for rev in &revs {
            let short = cache.shorten(rev, min);
            prop_assert!(short.len() >= min.min(40));
            prop_assert_eq!(
                cache.find_prefix(&short),
                PrefixLookup::Unique(rev.clone())
            );
        }
    }

    #[test]
    fn ordinals_are_dense_and_positional(
        revs in proptest::collection::hash_set(rev_strategy(), 1..32),
    ) {
        let revs: Vec<Rev> = revs.into_iter().collect();
        let cache = linear_cache(&revs);
        prop_assert_eq!(cache.commit_count(), revs.len());
        for (i, rev) in revs.iter().enumerate() {
            prop_assert_eq!(cache.node(rev).unwrap().ordinal, Some(i + 1));
        }
        prop_assert_eq!(cache.youngest(), revs.first());
        prop_assert_eq!(cache.oldest(), revs.last());
    }

    #[test]
    fn history_relative_inverts(
        revs in proptest::collection::hash_set(rev_strategy(), 2..32),
        step in 1i64..8,
    ) {
        let revs: Vec<Rev> = revs.into_iter().collect();
        let cache = linear_cache(&revs);
        for rev in &revs {
            if let Some(moved) = cache.history_relative(rev, step) {
                prop_assert_eq!(cache.history_relative(moved, -step), Some(rev));
            }
        }
        prop_assert_eq!(cache.history_relative(cache.oldest().unwrap(), -1), None);
    }

    #[test]
    fn bounded_cache_matches_fifo_model(
        capacity in 1usize..8,
        ops in proptest::collection::vec((0u8..16, 0u32..100), 0..64),
    ) {
        let mut cache = BoundedCache::new(capacity);
        // Reference model: ordered (key, value) pairs, pure FIFO.
        let mut model: Vec<(u8, u32)> = Vec::new();

        for (key, value) in ops {
            if let Some(slot) = model.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
            } else {
                model.push((key, value));
                if model.len() > capacity {
                    model.remove(0);
                }
            }
            cache.insert(key, value);

            prop_assert_eq!(cache.len(), model.len());
            for (k, v) in &model {
                prop_assert_eq!(cache.get(k), Some(v));
            }
        }
    }
}
