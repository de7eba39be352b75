#![forbid(unsafe_code)]

//! Publisher/subscriber channels used by properties, chains, lists and types.
//!
//! - [`Event`]: a shared, single-threaded channel. Handlers are fallible and
//!   run in registration order; the first error stops dispatch and is
//!   returned to the publisher.
//! - [`Subscription`]: RAII guard that removes its handler on drop.
//! - [`SubscriptionSet`]: owns a group of subscriptions and releases them
//!   together.
//!
//! # Subscriber-count signal
//!
//! An event reports every change in its subscriber count to watchers
//! registered with [`Event::watch_subscribers`]. Dependency chains rely on the
//! zero/non-zero transitions to wire and unwire their per-step handlers
//! lazily.
//!
//! # Invariants
//!
//! 1. Handlers are invoked in registration order.
//! 2. Dispatch works on a snapshot: handlers added during a publish are first
//!    called on the next publish, handlers removed during a publish may still
//!    be called once.
//! 3. No `RefCell` borrow is held while a handler or watcher runs, so handlers
//!    may subscribe, unsubscribe and publish re-entrantly.
//! 4. Dropping a [`Subscription`] after its event is gone is a no-op.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::Result;

type Handler<A> = Rc<dyn Fn(&A) -> Result<()>>;
type Watcher = Rc<dyn Fn(SubscriberCount)>;

/// A change in the number of handlers attached to an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberCount {
    /// Count before the change.
    pub previous: usize,
    /// Count after the change.
    pub current: usize,
}

impl SubscriberCount {
    /// The first handler was attached.
    #[must_use]
    pub fn became_active(self) -> bool {
        self.previous == 0 && self.current > 0
    }

    /// The last handler was removed.
    #[must_use]
    pub fn became_idle(self) -> bool {
        self.previous > 0 && self.current == 0
    }
}

struct EventInner<A> {
    handlers: RefCell<Vec<(u64, Handler<A>)>>,
    next_id: Cell<u64>,
    watchers: RefCell<Vec<Watcher>>,
}

impl<A> EventInner<A> {
    fn remove(&self, id: u64) {
        let counts = {
            let mut handlers = self.handlers.borrow_mut();
            let previous = handlers.len();
            handlers.retain(|(handler_id, _)| *handler_id != id);
            SubscriberCount {
                previous,
                current: handlers.len(),
            }
        };
        if counts.previous != counts.current {
            self.notify_watchers(counts);
        }
    }

    fn notify_watchers(&self, counts: SubscriberCount) {
        let watchers: Vec<Watcher> = self.watchers.borrow().iter().cloned().collect();
        for watcher in watchers {
            watcher(counts);
        }
    }
}

/// A single-threaded event channel carrying arguments of type `A`.
///
/// Cloning an `Event` yields another handle to the same channel.
pub struct Event<A> {
    inner: Rc<EventInner<A>>,
}

impl<A> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self {
            inner: Rc::new(EventInner {
                handlers: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
                watchers: RefCell::new(Vec::new()),
            }),
        }
    }
}

impl<A> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.inner.handlers.borrow().len())
            .finish()
    }
}

impl<A: 'static> Event<A> {
    /// Create an event with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a handler. The handler stays attached until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(&self, handler: impl Fn(&A) -> Result<()> + 'static) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        let counts = {
            let mut handlers = self.inner.handlers.borrow_mut();
            handlers.push((id, Rc::new(handler)));
            SubscriberCount {
                previous: handlers.len() - 1,
                current: handlers.len(),
            }
        };
        self.inner.notify_watchers(counts);

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(id);
            }
        })
    }

    /// Invoke every handler with `args`, stopping at the first error.
    pub fn publish(&self, args: &A) -> Result<()> {
        let handlers: Vec<Handler<A>> = self
            .inner
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in handlers {
            handler(args)?;
        }
        Ok(())
    }

    /// Number of attached handlers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    /// Whether any handler is attached.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Register a watcher called after every change in the subscriber count.
    ///
    /// Watchers live as long as the event.
    pub fn watch_subscribers(&self, watcher: impl Fn(SubscriberCount) + 'static) {
        self.inner.watchers.borrow_mut().push(Rc::new(watcher));
    }
}

/// RAII guard that detaches a handler when dropped.
#[must_use = "dropping a Subscription detaches its handler"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Detach the handler now.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}

/// Owns a group of subscriptions.
///
/// Subscriptions are released in reverse registration order when the set is
/// cleared or dropped.
#[derive(Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `subscription` alive until the set is cleared or dropped.
    pub fn hold(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    /// Number of held subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether the set holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Release every subscription now.
    pub fn clear(&mut self) {
        while let Some(subscription) = self.subscriptions.pop() {
            drop(subscription);
        }
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("len", &self.subscriptions.len())
            .finish()
    }
}
