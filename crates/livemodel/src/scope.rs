#![forbid(unsafe_code)]

//! Execution scopes: batching and cascade bounds for rule-triggered work.
//!
//! Every call that may cascade runs through [`ExecutionScope::perform`],
//! which opens a child scope, runs the callback, then disposes the child.
//! Work deferred with [`ExecutionScope::on_exit`] is queued on the innermost
//! open scope and either
//!
//! - handed over to the parent scope when the child is disposed while the
//!   parent is still open (a *transfer*), or
//! - run when the outermost scope is disposed.
//!
//! Handlers queued while the outermost queue runs form the next *pass*.
//! Passes repeat until no handler is left.
//!
//! # Invariants
//!
//! 1. Scopes close in LIFO order; the current scope is always the innermost
//!    open one.
//! 2. A queued handler runs exactly once, with either
//!    [`ScopeExit::Completed`] or [`ScopeExit::Aborted`].
//! 3. No exit handler runs while a parent scope is still open, unless the
//!    child callback failed.
//! 4. Keyed handlers with the same [`ExitKey`] are coalesced while they wait
//!    in the same scope.
//!
//! # Failure Modes
//!
//! | Condition | Result |
//! |-----------|--------|
//! | Nesting deeper than `max_depth` | `DepthLimitExceeded`, callback not run |
//! | Transfers or passes exceed `max_transfer_count` | `TransferLimitExceeded`, pending handlers aborted |
//! | Callback fails | Queued handlers see `Aborted`, the error is logged and returned |
//! | Exit handler fails | Rest of the pass is aborted, the error is returned |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use tracing::{debug, error, trace, warn};

use crate::config::{DEFAULT_MAX_SCOPE_DEPTH, DEFAULT_MAX_TRANSFER_COUNT};
use crate::error::{ModelError, Result};

/// Bounds enforced by an [`ExecutionScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeLimits {
    /// Maximum number of successive hand-offs of pending exit handlers.
    pub max_transfer_count: usize,
    /// Maximum nesting depth of `perform` calls.
    pub max_depth: usize,
}

impl Default for ScopeLimits {
    fn default() -> Self {
        Self {
            max_transfer_count: DEFAULT_MAX_TRANSFER_COUNT,
            max_depth: DEFAULT_MAX_SCOPE_DEPTH,
        }
    }
}

/// How a scope ended, as seen by its exit handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeExit {
    /// The work completed; the handler should do its job.
    Completed,
    /// The work failed; the handler must not produce effects.
    Aborted,
}

impl ScopeExit {
    #[must_use]
    pub fn is_aborted(self) -> bool {
        self == Self::Aborted
    }
}

/// Coalescing key for exit handlers: one rule for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitKey {
    pub rule: u64,
    pub entity: u64,
}

/// Snapshot of the innermost open scope, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeInfo {
    pub id: u64,
    /// 1 for the outermost scope.
    pub depth: usize,
    /// Handlers waiting for this scope to close.
    pub pending_exits: usize,
    /// Transfer count accumulated so far.
    pub transfers: usize,
}

type ExitHandler = Box<dyn FnOnce(ScopeExit) -> Result<()>>;

struct Frame {
    id: u64,
    depth: usize,
    transfers: usize,
    queue: Vec<(Option<ExitKey>, ExitHandler)>,
    keys: AHashSet<ExitKey>,
}

impl Frame {
    fn enqueue(&mut self, key: Option<ExitKey>, handler: ExitHandler) -> bool {
        if let Some(key) = key
            && !self.keys.insert(key)
        {
            return false;
        }
        self.queue.push((key, handler));
        true
    }

    fn info(&self) -> ScopeInfo {
        ScopeInfo {
            id: self.id,
            depth: self.depth,
            pending_exits: self.queue.len(),
            transfers: self.transfers,
        }
    }
}

struct ScopeInner {
    limits: ScopeLimits,
    stack: RefCell<Vec<Frame>>,
    next_id: Cell<u64>,
}

/// The per-model unit-of-work tracker.
///
/// Cloning yields another handle to the same scope stack.
#[derive(Clone)]
pub struct ExecutionScope {
    inner: Rc<ScopeInner>,
}

impl fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("limits", &self.inner.limits)
            .field("current", &self.current())
            .finish()
    }
}

impl Default for ExecutionScope {
    fn default() -> Self {
        Self::new(ScopeLimits::default())
    }
}

impl ExecutionScope {
    /// Create a scope tracker with the given bounds.
    #[must_use]
    pub fn new(limits: ScopeLimits) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                limits,
                stack: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    #[must_use]
    pub fn limits(&self) -> ScopeLimits {
        self.inner.limits
    }

    /// The innermost open scope, if any.
    #[must_use]
    pub fn current(&self) -> Option<ScopeInfo> {
        self.inner.stack.borrow().last().map(Frame::info)
    }

    /// Whether any scope is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.inner.stack.borrow().is_empty()
    }

    /// Run `f` inside a child scope.
    pub fn perform<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let id = self.open_frame(0)?;
        let outcome = f();
        let frame = self.close_frame(id);

        match outcome {
            Ok(value) => {
                self.dispose(frame)?;
                Ok(value)
            }
            Err(err) => {
                warn!(scope = id, error = %err, "scope callback failed; aborting exit handlers");
                abort_all(frame.queue);
                Err(err)
            }
        }
    }

    /// Run `handler` when the current unit of work completes, or right away
    /// when none is open.
    pub fn on_exit(&self, handler: impl FnOnce(ScopeExit) -> Result<()> + 'static) -> Result<()> {
        self.enqueue(None, Box::new(handler))
    }

    /// Like [`on_exit`](Self::on_exit), but a handler with the same `key`
    /// already waiting in the current scope absorbs this one.
    pub fn on_exit_keyed(
        &self,
        key: ExitKey,
        handler: impl FnOnce(ScopeExit) -> Result<()> + 'static,
    ) -> Result<()> {
        self.enqueue(Some(key), Box::new(handler))
    }

    fn enqueue(&self, key: Option<ExitKey>, handler: ExitHandler) -> Result<()> {
        let deferred = {
            let mut stack = self.inner.stack.borrow_mut();
            match stack.last_mut() {
                Some(frame) => {
                    if !frame.enqueue(key, handler) {
                        trace!(scope = frame.id, ?key, "exit handler coalesced");
                    }
                    None
                }
                None => Some(handler),
            }
        };
        match deferred {
            Some(handler) => handler(ScopeExit::Completed),
            None => Ok(()),
        }
    }

    fn open_frame(&self, transfers: usize) -> Result<u64> {
        let mut stack = self.inner.stack.borrow_mut();
        let depth = stack.len() + 1;
        if depth > self.inner.limits.max_depth {
            error!(limit = self.inner.limits.max_depth, "scope depth limit exceeded");
            return Err(ModelError::DepthLimitExceeded {
                limit: self.inner.limits.max_depth,
            });
        }
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        stack.push(Frame {
            id,
            depth,
            transfers,
            queue: Vec::new(),
            keys: AHashSet::new(),
        });
        trace!(scope = id, depth, "scope opened");
        Ok(id)
    }

    fn close_frame(&self, id: u64) -> Frame {
        let mut stack = self.inner.stack.borrow_mut();
        // Frames close in LIFO order; anything above `id` was leaked by a
        // callback and is folded into it.
        let position = stack.iter().rposition(|frame| frame.id == id).unwrap_or(0);
        let mut frames = stack.split_off(position);
        let mut frame = frames.remove(0);
        for stray in frames {
            frame.queue.extend(stray.queue);
        }
        trace!(scope = id, pending = frame.queue.len(), "scope closed");
        frame
    }

    fn dispose(&self, frame: Frame) -> Result<()> {
        let Frame {
            id,
            transfers: child_transfers,
            queue,
            ..
        } = frame;
        if queue.is_empty() {
            return Ok(());
        }
        if !self.is_active() {
            return self.flush(queue, child_transfers);
        }
        let limit = self.inner.limits.max_transfer_count;
        let overflow = {
            let mut stack = self.inner.stack.borrow_mut();
            let Some(parent) = stack.last_mut() else {
                return Ok(());
            };
            let transfers = parent.transfers.max(child_transfers + 1);
            if transfers <= limit {
                parent.transfers = transfers;
                trace!(
                    from = id,
                    to = parent.id,
                    handlers = queue.len(),
                    transfers,
                    "exit handlers transferred"
                );
                for (key, handler) in queue {
                    parent.enqueue(key, handler);
                }
                return Ok(());
            }
            queue
        };
        error!(limit, "scope transfer limit exceeded");
        abort_all(overflow);
        Err(ModelError::TransferLimitExceeded { limit })
    }

    fn flush(&self, mut queue: Vec<(Option<ExitKey>, ExitHandler)>, mut transfers: usize) -> Result<()> {
        let limit = self.inner.limits.max_transfer_count;
        let mut pass = 0usize;
        while !queue.is_empty() {
            pass += 1;
            debug!(pass, handlers = queue.len(), transfers, "flushing exit handlers");

            let id = self.open_frame(transfers)?;
            let mut failure = None;
            for (_, handler) in queue.drain(..) {
                if failure.is_some() {
                    if let Err(err) = handler(ScopeExit::Aborted) {
                        warn!(pass, error = %err, "exit handler failed during abort");
                    }
                } else if let Err(err) = handler(ScopeExit::Completed) {
                    failure = Some(err);
                }
            }
            let frame = self.close_frame(id);

            if let Some(err) = failure {
                abort_all(frame.queue);
                return Err(err);
            }
            transfers = frame.transfers + 1;
            queue = frame.queue;
            if !queue.is_empty() && transfers > limit {
                error!(limit, pass, "scope transfer limit exceeded");
                abort_all(queue);
                return Err(ModelError::TransferLimitExceeded { limit });
            }
        }
        Ok(())
    }
}

fn abort_all(queue: Vec<(Option<ExitKey>, ExitHandler)>) {
    for (_, handler) in queue {
        if let Err(err) = handler(ScopeExit::Aborted) {
            warn!(error = %err, "exit handler failed during abort");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    fn scope(max_transfer_count: usize, max_depth: usize) -> ExecutionScope {
        ExecutionScope::new(ScopeLimits {
            max_transfer_count,
            max_depth,
        })
    }

    #[test]
    fn on_exit_without_scope_runs_immediately() {
        let scope = ExecutionScope::default();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        scope
            .on_exit(move |exit| {
                assert_eq!(exit, ScopeExit::Completed);
                r.set(true);
                Ok(())
            })
            .unwrap();
        assert!(ran.get());
    }

    #[test]
    fn nested_handlers_wait_for_outermost_scope() {
        let scope = ExecutionScope::default();
        let log = Rc::new(RefCell::new(Vec::new()));

        let s = scope.clone();
        let l = Rc::clone(&log);
        scope
            .perform(|| {
                let inner_scope = s.clone();
                let l2 = Rc::clone(&l);
                s.perform(|| {
                    let l3 = Rc::clone(&l2);
                    inner_scope.on_exit(move |_| {
                        l3.borrow_mut().push("exit");
                        Ok(())
                    })
                })?;
                l.borrow_mut().push("after inner");
                assert_eq!(s.current().map(|info| info.pending_exits), Some(1));
                Ok(())
            })
            .unwrap();

        assert_eq!(*log.borrow(), vec!["after inner", "exit"]);
        assert!(scope.current().is_none());
    }

    #[test]
    fn failing_callback_aborts_handlers_and_returns_error() {
        let scope = ExecutionScope::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = scope.clone();
        let sink = Rc::clone(&seen);
        let err = scope
            .perform(|| -> Result<()> {
                s.on_exit(move |exit| {
                    sink.borrow_mut().push(exit);
                    Ok(())
                })?;
                Err(ModelError::custom("boom"))
            })
            .unwrap_err();

        assert_eq!(err, ModelError::custom("boom"));
        assert_eq!(*seen.borrow(), vec![ScopeExit::Aborted]);
        assert!(!scope.is_active());
    }

    #[test]
    fn depth_limit_is_enforced() {
        fn recurse(scope: &ExecutionScope, n: usize) -> Result<usize> {
            let s = scope.clone();
            scope.perform(move || recurse(&s, n + 1))
        }
        let scope = scope(100, 8);
        assert_eq!(
            recurse(&scope, 0),
            Err(ModelError::DepthLimitExceeded { limit: 8 })
        );
        assert!(!scope.is_active());
    }

    #[test]
    fn self_requeueing_handler_hits_transfer_limit() {
        fn requeue(scope: &ExecutionScope, count: Rc<Cell<usize>>) -> Result<()> {
            let s = scope.clone();
            scope.on_exit(move |exit| {
                if exit.is_aborted() {
                    return Ok(());
                }
                count.set(count.get() + 1);
                let inner = s.clone();
                s.perform(|| requeue(&inner, count))
            })
        }

        let scope = scope(5, 50);
        let count = Rc::new(Cell::new(0));
        let s = scope.clone();
        let c = Rc::clone(&count);
        let err = scope.perform(|| requeue(&s, c)).unwrap_err();
        assert_eq!(err, ModelError::TransferLimitExceeded { limit: 5 });
        assert_eq!(count.get(), 5);
        assert!(!scope.is_active());
    }

    #[test]
    fn converging_cascade_settles() {
        let scope = scope(5, 50);
        let remaining = Rc::new(Cell::new(3));
        fn step(scope: &ExecutionScope, remaining: Rc<Cell<usize>>) -> Result<()> {
            let s = scope.clone();
            scope.on_exit(move |_| {
                if remaining.get() == 0 {
                    return Ok(());
                }
                remaining.set(remaining.get() - 1);
                step(&s, remaining)
            })
        }
        let s = scope.clone();
        let r = Rc::clone(&remaining);
        scope.perform(|| step(&s, r)).unwrap();
        assert_eq!(remaining.get(), 0);
    }

    #[test]
    fn keyed_handlers_coalesce() {
        let scope = ExecutionScope::default();
        let runs = Rc::new(Cell::new(0));
        let key = ExitKey { rule: 1, entity: 7 };
        let s = scope.clone();
        let r = Rc::clone(&runs);
        scope
            .perform(|| {
                for _ in 0..3 {
                    let r = Rc::clone(&r);
                    s.on_exit_keyed(key, move |_| {
                        r.set(r.get() + 1);
                        Ok(())
                    })?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn handler_failure_aborts_rest_of_pass() {
        let scope = ExecutionScope::default();
        let later = Rc::new(RefCell::new(None));
        let s = scope.clone();
        let l = Rc::clone(&later);
        let err = scope
            .perform(|| {
                s.on_exit(|_| Err(ModelError::custom("first failed")))?;
                s.on_exit(move |exit| {
                    *l.borrow_mut() = Some(exit);
                    Ok(())
                })
            })
            .unwrap_err();
        assert_eq!(err, ModelError::custom("first failed"));
        assert_eq!(*later.borrow(), Some(ScopeExit::Aborted));
    }

    /// Counts `WARN` events seen while installed.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }
    }

    #[test]
    fn aborted_handler_failure_is_logged_not_returned() {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));

        let err = tracing::subscriber::with_default(subscriber, || {
            let scope = ExecutionScope::default();
            let s = scope.clone();
            scope
                .perform(|| {
                    s.on_exit(|_| Err(ModelError::custom("first failed")))?;
                    s.on_exit(|exit| match exit {
                        ScopeExit::Aborted => Err(ModelError::custom("cleanup failed")),
                        ScopeExit::Completed => Ok(()),
                    })
                })
                .unwrap_err()
        });

        assert_eq!(err, ModelError::custom("first failed"));
        assert_eq!(warnings.load(AtomicOrdering::SeqCst), 1);
    }
}
