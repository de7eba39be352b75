#![forbid(unsafe_code)]

//! A shared, change-tracked ordered container.
//!
//! Every structural mutation publishes one [`ListChange`] carrying the
//! [`ChangeRecord`]s it produced. Inside [`ObservableList::batch_update`] the
//! records are collected instead and published once when the outermost batch
//! returns, or not at all when the contents ended up unchanged.
//!
//! # Invariants
//!
//! 1. Storage is updated before the change is published, so handlers always
//!    read the new contents.
//! 2. Records in one change are ordered as the storage was affected and
//!    replay in order against the previous contents.
//! 3. The version counter increments once per published change.
//! 4. A mutation that leaves the contents untouched publishes nothing.
//!
//! # Failure Modes
//!
//! A change handler failure is returned by the mutator that published the
//! change. Storage has already been updated at that point; the error reports
//! what the observers (and any rule cascade they started) could not do.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::rc::Rc;

use tracing::trace;

use super::change::{ChangeRecord, merge_records};
use crate::error::Result;
use crate::event::{Event, Subscription};

/// One published change: the ordered records of a single logical operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ListChange<T> {
    pub changes: Vec<ChangeRecord<T>>,
}

struct Batch<T> {
    depth: usize,
    snapshot: Vec<T>,
    records: Vec<ChangeRecord<T>>,
}

struct ListInner<T> {
    items: RefCell<Vec<T>>,
    changed: Event<ListChange<T>>,
    batch: RefCell<Option<Batch<T>>>,
    version: Cell<u64>,
}

/// A shared, observable sequence.
///
/// Cloning yields another handle to the same storage. Equality and hashing
/// are by identity.
pub struct ObservableList<T> {
    inner: Rc<ListInner<T>>,
}

impl<T> Clone for ObservableList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for ObservableList<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for ObservableList<T> {}

impl<T> Hash for ObservableList<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Rc::as_ptr(&self.inner), state);
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.items.borrow().iter()).finish()
    }
}

impl<T> Default for ObservableList<T> {
    fn default() -> Self {
        Self::from_vec(Vec::new())
    }
}

impl<T> From<Vec<T>> for ObservableList<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

impl<T> FromIterator<T> for ObservableList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T> ObservableList<T> {
    fn from_vec(items: Vec<T>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                items: RefCell::new(items),
                changed: Event::default(),
                batch: RefCell::new(None),
                version: Cell::new(0),
            }),
        }
    }

    /// Whether two handles share storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Number of changes published so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Borrow the items for the duration of `f`.
    ///
    /// `f` must not mutate this list.
    pub fn with_items<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.inner.items.borrow())
    }

    /// The change event.
    #[must_use]
    pub fn changed(&self) -> &Event<ListChange<T>> {
        &self.inner.changed
    }

    /// Whether a batch is open.
    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.inner.batch.borrow().is_some()
    }
}

impl<T: Clone + PartialEq + 'static> ObservableList<T> {
    /// Create a list holding `items`.
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        items.into_iter().collect()
    }

    /// Attach a change handler.
    pub fn subscribe(&self, handler: impl Fn(&ListChange<T>) -> Result<()> + 'static) -> Subscription {
        self.inner.changed.subscribe(handler)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.items.borrow().get(index).cloned()
    }

    #[must_use]
    pub fn first(&self) -> Option<T> {
        self.get(0)
    }

    #[must_use]
    pub fn last(&self) -> Option<T> {
        self.inner.items.borrow().last().cloned()
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.items.borrow().clone()
    }

    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.inner.items.borrow().contains(item)
    }

    #[must_use]
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.inner.items.borrow().iter().position(|candidate| candidate == item)
    }

    // -----------------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------------

    /// Append one item.
    pub fn push(&self, item: T) -> Result<()> {
        self.extend([item])
    }

    /// Append several items as one change.
    pub fn extend(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        let items: Vec<T> = items.into_iter().collect();
        if items.is_empty() {
            return Ok(());
        }
        let start = {
            let mut storage = self.inner.items.borrow_mut();
            let start = storage.len();
            storage.extend(items.iter().cloned());
            start
        };
        self.emit(vec![ChangeRecord::add(start, items)])
    }

    /// Remove and return the last item.
    pub fn pop(&self) -> Result<Option<T>> {
        let popped = {
            let mut storage = self.inner.items.borrow_mut();
            storage.pop().map(|item| (storage.len(), item))
        };
        let Some((index, item)) = popped else {
            return Ok(None);
        };
        self.emit(vec![ChangeRecord::remove(index, vec![item.clone()])])?;
        Ok(Some(item))
    }

    /// Remove and return the first item.
    pub fn shift(&self) -> Result<Option<T>> {
        let item = {
            let mut storage = self.inner.items.borrow_mut();
            if storage.is_empty() {
                return Ok(None);
            }
            storage.remove(0)
        };
        self.emit(vec![ChangeRecord::remove(0, vec![item.clone()])])?;
        Ok(Some(item))
    }

    /// Prepend items, keeping their order.
    pub fn unshift(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.splice(0, 0, items).map(drop)
    }

    /// Insert `item` at `index` (clamped to the length).
    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.splice(index, 0, [item]).map(drop)
    }

    /// Remove and return the item at `index`.
    pub fn remove_at(&self, index: usize) -> Result<Option<T>> {
        Ok(self.splice(index, 1, [])?.pop())
    }

    /// Remove the first occurrence of `item`. Returns whether one was found.
    pub fn remove_item(&self, item: &T) -> Result<bool> {
        match self.index_of(item) {
            Some(index) => Ok(self.remove_at(index)?.is_some()),
            None => Ok(false),
        }
    }

    /// Remove `delete_count` items at `start`, then insert `items` there.
    ///
    /// `start` and `delete_count` are clamped to the contents. Produces a
    /// remove record followed by an add record, omitting empty ones.
    pub fn splice(&self, start: usize, delete_count: usize, items: impl IntoIterator<Item = T>) -> Result<Vec<T>> {
        let inserted: Vec<T> = items.into_iter().collect();
        let (start, removed) = {
            let mut storage = self.inner.items.borrow_mut();
            let start = start.min(storage.len());
            let end = start.saturating_add(delete_count).min(storage.len());
            let removed: Vec<T> = storage.splice(start..end, inserted.iter().cloned()).collect();
            (start, removed)
        };
        let mut records = Vec::with_capacity(2);
        if !removed.is_empty() {
            records.push(ChangeRecord::remove(start, removed.clone()));
        }
        if !inserted.is_empty() {
            records.push(ChangeRecord::add(start, inserted));
        }
        self.emit(records)?;
        Ok(removed)
    }

    /// Overwrite the item at `index`. Returns the previous item.
    pub fn set(&self, index: usize, item: T) -> Result<Option<T>> {
        let previous = {
            let mut storage = self.inner.items.borrow_mut();
            let Some(slot) = storage.get_mut(index) else {
                return Ok(None);
            };
            if *slot == item {
                return Ok(Some(item));
            }
            std::mem::replace(slot, item)
        };
        self.emit(vec![ChangeRecord::replace(index..index + 1)])?;
        Ok(Some(previous))
    }

    /// Remove everything.
    pub fn clear(&self) -> Result<()> {
        let removed = std::mem::take(&mut *self.inner.items.borrow_mut());
        if removed.is_empty() {
            return Ok(());
        }
        self.emit(vec![ChangeRecord::remove(0, removed)])
    }

    /// Stable sort; publishes one reorder record when the order changed.
    pub fn sort_by(&self, compare: impl FnMut(&T, &T) -> Ordering) -> Result<()> {
        let changed = {
            let mut storage = self.inner.items.borrow_mut();
            let before = storage.clone();
            storage.sort_by(compare);
            *storage != before
        };
        self.emit_reorder_all(changed)
    }

    /// Reverse in place; publishes one reorder record when the order changed.
    pub fn reverse(&self) -> Result<()> {
        let changed = {
            let mut storage = self.inner.items.borrow_mut();
            let before = storage.clone();
            storage.reverse();
            *storage != before
        };
        self.emit_reorder_all(changed)
    }

    fn emit_reorder_all(&self, changed: bool) -> Result<()> {
        if !changed {
            return Ok(());
        }
        let len = self.len();
        self.emit(vec![ChangeRecord::reorder(0..len)])
    }

    /// Overwrite `range` (clamped) with copies of `value`.
    pub fn fill(&self, value: T, range: Range<usize>) -> Result<()> {
        let span = {
            let mut storage = self.inner.items.borrow_mut();
            let end = range.end.min(storage.len());
            let start = range.start.min(end);
            let mut changed = false;
            for slot in &mut storage[start..end] {
                if *slot != value {
                    *slot = value.clone();
                    changed = true;
                }
            }
            changed.then_some(start..end)
        };
        match span {
            Some(span) => self.emit(vec![ChangeRecord::replace(span)]),
            None => Ok(()),
        }
    }

    /// Copy the items in `source` over the positions starting at `dest`.
    ///
    /// The copy is truncated at the end of the list; the length never
    /// changes.
    pub fn copy_within(&self, source: Range<usize>, dest: usize) -> Result<()> {
        let span = {
            let mut storage = self.inner.items.borrow_mut();
            let len = storage.len();
            let end = source.end.min(len);
            let start = source.start.min(end);
            let dest = dest.min(len);
            let count = (end - start).min(len - dest);
            let chunk: Vec<T> = storage[start..start + count].to_vec();
            let mut changed = false;
            for (offset, item) in chunk.into_iter().enumerate() {
                let slot = &mut storage[dest + offset];
                if *slot != item {
                    *slot = item;
                    changed = true;
                }
            }
            changed.then_some(dest..dest + count)
        };
        match span {
            Some(span) => self.emit(vec![ChangeRecord::replace(span)]),
            None => Ok(()),
        }
    }

    /// Replace the items starting at `start` with a permutation of them.
    pub(crate) fn reorder_span(&self, start: usize, permuted: Vec<T>) -> Result<()> {
        let end = start + permuted.len();
        {
            let mut storage = self.inner.items.borrow_mut();
            if end > storage.len() {
                return Ok(());
            }
            storage.splice(start..end, permuted);
        }
        self.emit(vec![ChangeRecord::reorder(start..end)])
    }

    // -----------------------------------------------------------------------
    // Batching
    // -----------------------------------------------------------------------

    /// Run `f`, publishing everything it changed as a single event.
    ///
    /// Batches nest; only the outermost one publishes. Nothing is published
    /// when the contents are the same as before the batch started. Mutators
    /// called inside the batch never fail; a handler failure surfaces here.
    pub fn batch_update<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        {
            let mut batch = self.inner.batch.borrow_mut();
            match batch.as_mut() {
                Some(open) => open.depth += 1,
                None => {
                    *batch = Some(Batch {
                        depth: 1,
                        snapshot: self.inner.items.borrow().clone(),
                        records: Vec::new(),
                    });
                }
            }
        }

        let result = f(self);

        let finished = {
            let mut batch = self.inner.batch.borrow_mut();
            match batch.as_mut() {
                Some(open) if open.depth > 1 => {
                    open.depth -= 1;
                    None
                }
                Some(_) => batch.take(),
                None => None,
            }
        };
        if let Some(done) = finished {
            let unchanged = *self.inner.items.borrow() == done.snapshot;
            if !unchanged {
                self.publish(done.records)?;
            }
        }
        result
    }

    fn emit(&self, records: Vec<ChangeRecord<T>>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        {
            let mut batch = self.inner.batch.borrow_mut();
            if let Some(open) = batch.as_mut() {
                open.records.extend(records);
                return Ok(());
            }
        }
        self.publish(records)
    }

    fn publish(&self, records: Vec<ChangeRecord<T>>) -> Result<()> {
        let changes = merge_records(records);
        if changes.is_empty() {
            return Ok(());
        }
        self.inner.version.set(self.inner.version.get() + 1);
        trace!(records = changes.len(), version = self.inner.version.get(), "list change published");
        self.inner.changed.publish(&ListChange { changes })
    }
}

/// Wrap `items` as an observable list, or return the same handle when it
/// already is one.
pub fn ensure_observable<T>(items: impl Into<ObservableList<T>>) -> ObservableList<T> {
    items.into()
}
