//! Child collection reconciliation
//!
//! A write request states the complete desired child set. Reconciling it
//! against the persisted rows is a key diff: keys on both sides update in
//! place, requested-only keys insert, persisted-only keys delete. Validation
//! always runs to completion before any of the resulting writes are issued.

use std::collections::HashMap;
use std::hash::Hash;

pub mod courses;
pub mod subtitles;
pub mod variants;

pub use courses::apply_courses;
pub use subtitles::{apply_subtitles, upsert_subtitle, validate_subtitle, validate_subtitles};
pub use variants::{apply_variants, requested_profile_names, validate_variants};

/// Writes needed to turn a persisted child set into a requested one
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan<R, S> {
    pub inserts: Vec<S>,
    /// Persisted row and the spec that replaces its fields
    pub updates: Vec<(R, S)>,
    pub deletes: Vec<R>,
    /// Keys present on both sides whose fields already match
    pub unchanged: usize,
}

impl<R, S> ReconcilePlan<R, S> {
    pub fn is_noop(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Diff `requested` against `persisted` by key.
///
/// `requested` must already be free of duplicate keys. Inserts keep request
/// order and deletes keep persisted order; `same` decides whether a matched
/// pair needs a write at all.
pub fn plan<K, R, S>(
    persisted: Vec<R>,
    requested: Vec<S>,
    row_key: impl Fn(&R) -> K,
    spec_key: impl Fn(&S) -> K,
    same: impl Fn(&S, &R) -> bool,
) -> ReconcilePlan<R, S>
where
    K: Eq + Hash,
{
    let mut by_key: HashMap<K, (usize, R)> = persisted
        .into_iter()
        .enumerate()
        .map(|(position, row)| (row_key(&row), (position, row)))
        .collect();

    let mut inserts = Vec::new();
    let mut updates = Vec::new();
    let mut unchanged = 0;

    for spec in requested {
        match by_key.remove(&spec_key(&spec)) {
            Some((_, row)) if same(&spec, &row) => unchanged += 1,
            Some((_, row)) => updates.push((row, spec)),
            None => inserts.push(spec),
        }
    }

    // Whatever is left was not requested.
    let mut leftovers: Vec<(usize, R)> = by_key.into_values().collect();
    leftovers.sort_by_key(|(position, _)| *position);
    let deletes = leftovers.into_iter().map(|(_, row)| row).collect();

    ReconcilePlan {
        inserts,
        updates,
        deletes,
        unchanged,
    }
}
