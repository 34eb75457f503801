//! # Slice Reducer
//!
//! Applies the three outcomes of a request to a [`SliceState`]:
//!
//! | Outcome   | Ledger                                  | Cache           |
//! |-----------|-----------------------------------------|-----------------|
//! | Pending   | insert/refresh entry, `attempts += 1`   | untouched       |
//! | Fulfilled | status = fulfilled                      | `update_state`  |
//! | Rejected  | status = rejected, error recorded       | untouched       |
//!
//! A rejected request never removes anything from the cache, so readers
//! keep seeing the last good data.

use tracing::trace;

use crate::history::{record_fulfilled, record_pending, record_rejected};
use crate::query::Query;
use crate::slice::SliceState;
use crate::types::{Outcome, RequestId, RequestKey};

/// Applies `outcome` for the request `request_id` under `key`.
pub fn apply<Q: Query>(
    query: &Q,
    state: &mut SliceState<Q::Args, Q::Cache>,
    key: &RequestKey,
    request_id: &RequestId,
    args: &Q::Args,
    outcome: Outcome<Q::Output>,
    now: u64,
) {
    let stamp = state.next_stamp(now);
    trace!(
        query = query.name(),
        key = %key,
        status = %outcome.status(),
        sequence = stamp.sequence,
        "reducing"
    );

    match outcome {
        Outcome::Pending => record_pending(&mut state.history, key, request_id, args, stamp),
        Outcome::Fulfilled(output) => {
            record_fulfilled(&mut state.history, key, request_id, args, stamp);
            query.update_state(args, &output, &mut state.cache);
        }
        Outcome::Rejected(error) => {
            record_rejected(&mut state.history, key, request_id, args, error, stamp)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::identity::set_key;
    use crate::types::{AsyncStatus, FetchError, History, HistoryEntry};

    /// Caches item -> payload; each item overwrites its previous payload.
    struct Items;

    impl Query for Items {
        type Args = Vec<String>;
        type Response = BTreeMap<String, u32>;
        type Output = BTreeMap<String, u32>;
        type Cache = BTreeMap<String, u32>;

        fn name(&self) -> &str {
            "items"
        }
        fn id(&self, args: &Self::Args) -> RequestKey {
            set_key(args)
        }
        fn should_skip(&self, args: &Self::Args) -> bool {
            args.is_empty()
        }
        fn in_scope(&self, _: &Self::Args, _: &Self::Args) -> bool {
            true
        }
        fn transform_args(
            &self,
            args: &Self::Args,
            _: &History<Self::Args>,
            _: &RequestKey,
            _: &[&HistoryEntry<Self::Args>],
        ) -> Self::Args {
            args.clone()
        }
        fn transform_result(&self, _: &Self::Args, responses: Vec<Self::Response>) -> Self::Output {
            responses.into_iter().flatten().collect()
        }
        fn update_state(&self, _: &Self::Args, output: &Self::Output, cache: &mut Self::Cache) {
            cache.extend(output.iter().map(|(k, v)| (k.clone(), *v)));
        }
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fulfilled_merges_and_overwrites_per_key() {
        let mut state = SliceState::new();
        let a = args(&["A", "B"]);
        let key = Items.id(&a);
        let id = RequestId::from(&key);

        apply(&Items, &mut state, &key, &id, &a, Outcome::Pending, 1);
        state.cache.insert("A".to_string(), 1);
        state.cache.insert("Z".to_string(), 9);

        let output = BTreeMap::from([("A".to_string(), 2), ("B".to_string(), 3)]);
        apply(&Items, &mut state, &key, &id, &a, Outcome::Fulfilled(output), 2);

        assert_eq!(state.cache["A"], 2);
        assert_eq!(state.cache["B"], 3);
        assert_eq!(state.cache["Z"], 9);

        let entry = &state.history[&key][&id];
        assert_eq!(entry.status, AsyncStatus::Fulfilled);
        assert_eq!(entry.attempts, 1);
        assert_eq!(entry.time, 1);
    }

    #[test]
    fn test_rejected_leaves_cache_untouched() {
        let mut state: SliceState<Vec<String>, BTreeMap<String, u32>> = SliceState::new();
        state.cache.insert("A".to_string(), 1);
        let a = args(&["A"]);
        let key = Items.id(&a);
        let id = RequestId::from(&key);

        apply(&Items, &mut state, &key, &id, &a, Outcome::Pending, 5);
        apply(
            &Items,
            &mut state,
            &key,
            &id,
            &a,
            Outcome::Rejected(FetchError::new("transport", "down")),
            6,
        );

        assert_eq!(state.cache.len(), 1);
        assert_eq!(state.cache["A"], 1);
        let entry = &state.history[&key][&id];
        assert!(entry.is_rejected());
        assert_eq!(entry.error.as_ref().map(|e| e.message.as_str()), Some("down"));
        assert_eq!(state.sequence(), 2);
    }
}
