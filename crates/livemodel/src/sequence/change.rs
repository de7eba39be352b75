#![forbid(unsafe_code)]

//! Typed change records describing structural edits to a sequence.
//!
//! Index ranges are half-open: `start_index..end_index`. Every record is
//! expressed against the state of the sequence at the moment it was applied,
//! so a list of records replays in order.

use std::fmt;
use std::ops::Range;

/// The kind of a [`ChangeRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Remove,
    Reorder,
    Replace,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
            Self::Reorder => write!(f, "reorder"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

/// One structural edit.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeRecord<T> {
    /// `items` were inserted and now occupy `start_index..end_index`.
    Add {
        start_index: usize,
        end_index: usize,
        items: Vec<T>,
    },
    /// `items` previously at `start_index..end_index` were removed.
    Remove {
        start_index: usize,
        end_index: usize,
        items: Vec<T>,
    },
    /// Items within `start_index..end_index` were permuted in place.
    Reorder { start_index: usize, end_index: usize },
    /// Items within `start_index..end_index` were overwritten in place.
    Replace { start_index: usize, end_index: usize },
}

impl<T> ChangeRecord<T> {
    /// Record for `items` inserted at `start`.
    pub fn add(start: usize, items: Vec<T>) -> Self {
        Self::Add {
            start_index: start,
            end_index: start + items.len(),
            items,
        }
    }

    /// Record for `items` removed from `start`.
    pub fn remove(start: usize, items: Vec<T>) -> Self {
        Self::Remove {
            start_index: start,
            end_index: start + items.len(),
            items,
        }
    }

    /// Record for a permutation of `range`.
    pub fn reorder(range: Range<usize>) -> Self {
        Self::Reorder {
            start_index: range.start,
            end_index: range.end,
        }
    }

    /// Record for an in-place overwrite of `range`.
    pub fn replace(range: Range<usize>) -> Self {
        Self::Replace {
            start_index: range.start,
            end_index: range.end,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Add { .. } => ChangeKind::Add,
            Self::Remove { .. } => ChangeKind::Remove,
            Self::Reorder { .. } => ChangeKind::Reorder,
            Self::Replace { .. } => ChangeKind::Replace,
        }
    }

    #[must_use]
    pub fn start_index(&self) -> usize {
        self.range().start
    }

    #[must_use]
    pub fn end_index(&self) -> usize {
        self.range().end
    }

    /// The affected index range.
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        match self {
            Self::Add {
                start_index,
                end_index,
                ..
            }
            | Self::Remove {
                start_index,
                end_index,
                ..
            }
            | Self::Reorder {
                start_index,
                end_index,
            }
            | Self::Replace {
                start_index,
                end_index,
            } => *start_index..*end_index,
        }
    }

    /// Number of affected positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.range().len()
    }

    /// A zero-length record is a no-op.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items carried by add/remove records; empty for the others.
    #[must_use]
    pub fn items(&self) -> &[T] {
        match self {
            Self::Add { items, .. } | Self::Remove { items, .. } => items,
            Self::Reorder { .. } | Self::Replace { .. } => &[],
        }
    }
}

/// Coalesce neighbouring records of the same kind that describe one
/// contiguous edit (e.g. consecutive pushes, repeated shifts).
pub(crate) fn merge_records<T>(records: Vec<ChangeRecord<T>>) -> Vec<ChangeRecord<T>> {
    let mut merged: Vec<ChangeRecord<T>> = Vec::with_capacity(records.len());
    for record in records {
        if record.is_empty() {
            continue;
        }
        let Some(last) = merged.pop() else {
            merged.push(record);
            continue;
        };
        match try_merge(last, record) {
            Ok(combined) => merged.push(combined),
            Err((last, record)) => {
                merged.push(last);
                merged.push(record);
            }
        }
    }
    merged
}

type Unmerged<T> = (ChangeRecord<T>, ChangeRecord<T>);

fn try_merge<T>(prev: ChangeRecord<T>, next: ChangeRecord<T>) -> Result<ChangeRecord<T>, Unmerged<T>> {
    use ChangeRecord::{Add, Remove, Reorder, Replace};
    match (prev, next) {
        (
            Add {
                start_index: a,
                end_index: a_end,
                items: mut a_items,
            },
            Add {
                start_index: b,
                items: b_items,
                ..
            },
        ) if b == a_end => {
            a_items.extend(b_items);
            Ok(ChangeRecord::add(a, a_items))
        }
        (
            Add {
                start_index: a,
                items: a_items,
                ..
            },
            Add {
                start_index: b,
                items: mut b_items,
                ..
            },
        ) if b == a => {
            b_items.extend(a_items);
            Ok(ChangeRecord::add(a, b_items))
        }
        (
            Remove {
                start_index: a,
                items: mut a_items,
                ..
            },
            Remove {
                start_index: b,
                items: b_items,
                ..
            },
        ) if b == a => {
            a_items.extend(b_items);
            Ok(ChangeRecord::remove(a, a_items))
        }
        (
            Remove {
                start_index: a,
                items: a_items,
                ..
            },
            Remove {
                start_index: b,
                end_index: b_end,
                items: mut b_items,
            },
        ) if b_end == a => {
            b_items.extend(a_items);
            Ok(ChangeRecord::remove(b, b_items))
        }
        (
            Reorder {
                start_index: a,
                end_index: a_end,
            },
            Reorder {
                start_index: b,
                end_index: b_end,
            },
        ) if b <= a_end && a <= b_end => Ok(ChangeRecord::reorder(a.min(b)..a_end.max(b_end))),
        (
            Replace {
                start_index: a,
                end_index: a_end,
            },
            Replace {
                start_index: b,
                end_index: b_end,
            },
        ) if b <= a_end && a <= b_end => Ok(ChangeRecord::replace(a.min(b)..a_end.max(b_end))),
        (prev, next) => Err((prev, next)),
    }
}
