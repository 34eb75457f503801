//! # Scope Reconciliation Helpers
//!
//! Queries implement [`Query::transform_args`](crate::query::Query::transform_args)
//! to reduce a demand to the part no earlier request already covers. The
//! engine hands them only the entries that share the demand's scope; these
//! helpers do the set arithmetic.
//!
//! ## Why Scope and Not Key?
//!
//! A request for `{A, B}` followed by a request for `{B}` produce different
//! keys, yet the second one is already satisfied. Reconciliation therefore
//! pools everything requested under the same scope (for example, the same
//! processing stage) regardless of which key requested it:
//!
//! ```text
//! scope S1:  {A,B} fulfilled   {D} pending
//! request:   {B, C, D}
//! missing:   {C}
//! ```

use std::collections::BTreeSet;

use crate::identity::uniq_sort_strings;

/// Returns the requested items not present in any of `covered`, sorted and
/// de-duplicated.
pub fn missing_items<'a, I, C>(requested: I, covered: C) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
    C: IntoIterator<Item = &'a str>,
{
    let covered: BTreeSet<&str> = covered.into_iter().collect();
    uniq_sort_strings(requested.into_iter().filter(|item| !covered.contains(item)))
}

/// One prior request in pair form: a set of entities and the set of
/// qualifiers (for example, phases) requested for all of them.
#[derive(Debug, Clone, Copy)]
pub struct PairCoverage<'a> {
    /// Entities covered by the request.
    pub entities: &'a [String],
    /// Qualifiers requested for each of those entities.
    pub qualifiers: &'a [String],
}

/// Determines the entity/qualifier pairs not yet covered by prior requests.
///
/// For every requested entity, the qualifiers already requested for it are
/// pooled across `prior`; any requested qualifier outside that pool is
/// missing. Returns the entities with at least one missing qualifier and the
/// union of the missing qualifiers, both sorted and de-duplicated.
///
/// # Example
///
/// ```rust
/// use fetchgate::reconcile::{determine_missing_pairs, PairCoverage};
///
/// let prior_channels = vec!["CH1".to_string()];
/// let prior_phases = vec!["P".to_string()];
/// let prior = [PairCoverage { entities: &prior_channels, qualifiers: &prior_phases }];
///
/// let channels = vec!["CH1".to_string(), "CH2".to_string()];
/// let phases = vec!["P".to_string()];
/// let (entities, qualifiers) = determine_missing_pairs(&channels, &phases, &prior);
/// assert_eq!(entities, vec!["CH2"]);
/// assert_eq!(qualifiers, vec!["P"]);
/// ```
pub fn determine_missing_pairs(
    entities: &[String],
    qualifiers: &[String],
    prior: &[PairCoverage<'_>],
) -> (Vec<String>, Vec<String>) {
    let mut missing_entities = Vec::new();
    let mut missing_qualifiers = Vec::new();

    for entity in entities {
        let existing = prior
            .iter()
            .filter(|p| p.entities.iter().any(|e| e == entity))
            .flat_map(|p| p.qualifiers.iter().map(String::as_str));

        let missing = missing_items(qualifiers.iter().map(String::as_str), existing);
        if !missing.is_empty() {
            missing_entities.push(entity.clone());
            missing_qualifiers.extend(missing);
        }
    }

    (
        uniq_sort_strings(missing_entities),
        uniq_sort_strings(missing_qualifiers),
    )
}

/// Splits `items` into chunks of at most `max` elements.
///
/// A `max` of zero is treated as one.
pub fn chunk<T: Clone>(items: &[T], max: usize) -> Vec<Vec<T>> {
    items.chunks(max.max(1)).map(<[T]>::to_vec).collect()
}
