#![forbid(unsafe_code)]

//! Minimal edit computation between two sequences.
//!
//! [`diff`] plans the edit in three phases, each expressed against the state
//! left by the previous one:
//!
//! 1. **Remove** every maximal run of items the desired sequence does not
//!    want (highest index first, so earlier indices stay valid).
//! 2. **Reorder** the smallest span of surviving items whose order differs
//!    from their order in the desired sequence.
//! 3. **Add** every maximal run of new items at its final position (lowest
//!    index first).
//!
//! Items are matched by equality with multiplicity, so an item present in
//! both sequences keeps its identity; it is moved, never removed and
//! re-added. The plan is built with hash counts in expected O(n + m).
//!
//! [`update_array`] applies a plan to an [`ObservableList`] inside one batch,
//! so observers see a single change.

use std::hash::Hash;
use std::ops::Range;

use ahash::AHashMap;
use tracing::debug;

use super::change::ChangeRecord;
use super::observable::ObservableList;
use crate::error::Result;

/// An edit that turns one sequence into another.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffPlan<T> {
    /// Removed runs in descending index order.
    removals: Vec<(usize, Vec<T>)>,
    /// Start of the reordered span and its new contents.
    reorder: Option<(usize, Vec<T>)>,
    /// Added runs in ascending index order.
    additions: Vec<(usize, Vec<T>)>,
}

impl<T: Clone> DiffPlan<T> {
    /// The plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.reorder.is_none() && self.additions.is_empty()
    }

    /// Number of removed items.
    #[must_use]
    pub fn removed_count(&self) -> usize {
        self.removals.iter().map(|(_, run)| run.len()).sum()
    }

    /// Number of added items.
    #[must_use]
    pub fn added_count(&self) -> usize {
        self.additions.iter().map(|(_, run)| run.len()).sum()
    }

    /// The reordered span, if any.
    #[must_use]
    pub fn reordered_span(&self) -> Option<Range<usize>> {
        self.reorder
            .as_ref()
            .map(|(start, items)| *start..*start + items.len())
    }

    /// The plan as change records, in application order.
    #[must_use]
    pub fn records(&self) -> Vec<ChangeRecord<T>> {
        let mut records = Vec::with_capacity(self.removals.len() + self.additions.len() + 1);
        for (start, run) in &self.removals {
            records.push(ChangeRecord::remove(*start, run.clone()));
        }
        if let Some(span) = self.reordered_span() {
            records.push(ChangeRecord::reorder(span));
        }
        for (start, run) in &self.additions {
            records.push(ChangeRecord::add(*start, run.clone()));
        }
        records
    }

    /// Apply the plan to a plain vector.
    pub fn apply_to(&self, items: &mut Vec<T>) {
        for (start, run) in &self.removals {
            items.drain(*start..*start + run.len());
        }
        if let Some((start, permuted)) = &self.reorder {
            items.splice(*start..*start + permuted.len(), permuted.iter().cloned());
        }
        for (start, run) in &self.additions {
            items.splice(*start..*start, run.iter().cloned());
        }
    }
}

impl<T: Clone + PartialEq + 'static> DiffPlan<T> {
    fn apply_to_list(&self, list: &ObservableList<T>) -> Result<()> {
        for (start, run) in &self.removals {
            list.splice(*start, run.len(), [])?;
        }
        if let Some((start, permuted)) = &self.reorder {
            list.reorder_span(*start, permuted.clone())?;
        }
        for (start, run) in &self.additions {
            list.splice(*start, 0, run.iter().cloned())?;
        }
        Ok(())
    }
}

/// Plan the edit from `current` to `desired`.
pub fn diff<T: Clone + Eq + Hash>(current: &[T], desired: &[T]) -> DiffPlan<T> {
    // Phase 1: keep as many of each item as the desired sequence wants.
    let mut wanted: AHashMap<&T, usize> = AHashMap::with_capacity(desired.len());
    for item in desired {
        *wanted.entry(item).or_insert(0) += 1;
    }
    let mut keep = Vec::with_capacity(current.len());
    for item in current {
        let slot = wanted.get_mut(item).filter(|count| **count > 0);
        keep.push(match slot {
            Some(count) => {
                *count -= 1;
                true
            }
            None => false,
        });
    }

    let mut removals = Vec::new();
    let mut index = 0;
    while index < current.len() {
        if keep[index] {
            index += 1;
            continue;
        }
        let start = index;
        while index < current.len() && !keep[index] {
            index += 1;
        }
        removals.push((start, current[start..index].to_vec()));
    }
    removals.reverse();

    // Phase 2: survivors versus the desired order of the same items.
    let survivors: Vec<&T> = current
        .iter()
        .zip(&keep)
        .filter_map(|(item, kept)| kept.then_some(item))
        .collect();
    let mut available: AHashMap<&T, usize> = AHashMap::with_capacity(survivors.len());
    for item in &survivors {
        *available.entry(*item).or_insert(0) += 1;
    }
    let mut common = Vec::with_capacity(survivors.len());
    let mut is_new = Vec::with_capacity(desired.len());
    for item in desired {
        let slot = available.get_mut(item).filter(|count| **count > 0);
        is_new.push(match slot {
            Some(count) => {
                *count -= 1;
                common.push(item);
                false
            }
            None => true,
        });
    }

    let first = survivors.iter().zip(&common).position(|(a, b)| a != b);
    let reorder = first.and_then(|lo| {
        let hi = survivors
            .iter()
            .zip(&common)
            .rposition(|(a, b)| a != b)?;
        Some((lo, common[lo..=hi].iter().map(|item| (*item).clone()).collect()))
    });

    // Phase 3: new runs land at their final index.
    let mut additions = Vec::new();
    let mut index = 0;
    while index < desired.len() {
        if !is_new[index] {
            index += 1;
            continue;
        }
        let start = index;
        while index < desired.len() && is_new[index] {
            index += 1;
        }
        additions.push((start, desired[start..index].to_vec()));
    }

    DiffPlan {
        removals,
        reorder,
        additions,
    }
}

/// Make `target` equal to `desired` with a minimal edit published as one
/// change. Returns the applied records; empty when nothing changed.
///
/// A failure raised by one of `target`'s change handlers is returned after
/// the contents have been updated.
pub fn update_array<T: Clone + Eq + Hash + 'static>(
    target: &ObservableList<T>,
    desired: &[T],
) -> Result<Vec<ChangeRecord<T>>> {
    let plan = target.with_items(|current| diff(current, desired));
    if plan.is_empty() {
        return Ok(Vec::new());
    }

    target.batch_update(|list| plan.apply_to_list(list))?;
    debug!(
        removed = plan.removed_count(),
        added = plan.added_count(),
        reordered = plan.reordered_span().map_or(0, |span| span.len()),
        "applied list diff"
    );
    Ok(plan.records())
}
