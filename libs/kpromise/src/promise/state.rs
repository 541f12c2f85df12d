// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::RefCell;
use core::mem;
use core::panic::{AssertUnwindSafe, Location};
use core::task::{Context, Poll, Waker};
use std::panic;
use std::rc::{Rc, Weak};

use smallvec::smallvec;

use super::link::{Handler, Link};
use super::{Id, Promise, Status};
use crate::error::{Error, ErrorKind};
use crate::executor::Handle;
use crate::task::TaskRef;
use crate::value::{Value, Values};

pub(super) type Finalizer = Box<dyn FnOnce(Status, Values)>;

pub(super) struct Inner {
    pub(super) id: Id,
    pub(super) handle: Handle,
    pub(super) location: &'static Location<'static>,
    pub(super) state: RefCell<State>,
}

pub(super) struct State {
    pub(super) status: Status,
    pub(super) values: Values,
    /// Things to run when this promise settles, in registration order.
    pub(super) reactions: Vec<Reaction>,
    /// Derived promises counted for cancellation. `finally` promises and awaiters are not in here.
    pub(super) consumers: Vec<Weak<Inner>>,
    pub(super) parent: Option<Weak<Inner>>,
    pub(super) cancel_hook: Option<Box<dyn FnOnce()>>,
    /// The executor task driving this promise, if it was created from a future.
    pub(super) task: Option<TaskRef>,
    /// Set once anything chained onto, awaited or otherwise observed this promise.
    pub(super) observed: bool,
    /// Set while following another promise. Only the adopted promise may settle this one.
    pub(super) adopting: bool,
}

pub(super) enum Reaction {
    Link(Link),
    Finally(Finalizer),
    Wake(Waker),
}

// === impl State ===

impl State {
    pub(super) fn new() -> Self {
        Self {
            status: Status::Pending,
            values: Values::new(),
            reactions: Vec::new(),
            consumers: Vec::new(),
            parent: None,
            cancel_hook: None,
            task: None,
            observed: false,
            adopting: false,
        }
    }
}

// === impl Reaction ===

impl Reaction {
    fn links_to(&self, consumer: &Rc<Inner>) -> bool {
        matches!(self, Reaction::Link(link) if Rc::ptr_eq(&link.derived.inner, consumer))
    }
}

// === impl Promise ===

impl Promise {
    pub(super) fn pending(handle: Handle, location: &'static Location<'static>) -> Self {
        Self {
            inner: Rc::new(Inner {
                id: Id::next(),
                handle,
                location,
                state: RefCell::new(State::new()),
            }),
        }
    }

    pub(super) fn from_inner(inner: Rc<Inner>) -> Self {
        Self { inner }
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    pub(super) fn set_task(&self, task: TaskRef) {
        let mut state = self.inner.state.borrow_mut();
        if state.status == Status::Pending {
            state.task = Some(task);
        }
    }

    pub(super) fn mark_observed(&self) {
        self.inner.state.borrow_mut().observed = true;
    }

    pub(crate) fn is_observed(&self) -> bool {
        self.inner.state.borrow().observed
    }

    /// Installs the cancellation hook, returning whether the promise is already cancelled.
    ///
    /// A hook handed to an already cancelled promise runs right away.
    pub(super) fn set_cancel_hook(&self, hook: Box<dyn FnOnce()>) -> bool {
        let mut state = self.inner.state.borrow_mut();
        match state.status {
            Status::Pending => {
                state.cancel_hook = Some(hook);
                false
            }
            Status::Cancelled => {
                drop(state);
                run_hook(self, hook);
                true
            }
            Status::Resolved | Status::Rejected => false,
        }
    }

    /// Whether `resolve`/`reject` calls are ignored: the promise settled or is adopting.
    fn is_locked(&self) -> bool {
        let state = self.inner.state.borrow();
        state.status != Status::Pending || state.adopting
    }

    pub(crate) fn resolve_values(&self, values: Values) {
        if self.is_locked() {
            tracing::trace!(promise.id = %self.inner.id, "ignoring resolution of a locked promise");
            if let Some(Value::Promise(other)) = values.first() {
                // nobody is going to adopt `other` after all
                other.consumer_cancelled(self);
            }
            return;
        }

        let Some(Value::Promise(other)) = values.first() else {
            self.settle(Status::Resolved, values);
            return;
        };
        let other = other.clone();

        if other == *self {
            let err = Error::at(ErrorKind::ExecutionError, self.inner.location)
                .with_message("a promise cannot be resolved with itself");
            self.settle(Status::Rejected, smallvec![err.into()]);
            return;
        }

        if values.len() > 1 {
            tracing::warn!(
                promise.id = %self.inner.id,
                "resolving with a promise discards the {} values after it",
                values.len() - 1
            );
        }

        self.adopt(&other);
    }

    pub(crate) fn reject_values(&self, values: Values) {
        if self.is_locked() {
            tracing::trace!(promise.id = %self.inner.id, "ignoring rejection of a locked promise");
            return;
        }
        self.settle(Status::Rejected, values);
    }

    /// Follows the eventual state of `other`, including cancellation in both directions.
    fn adopt(&self, other: &Promise) {
        tracing::trace!(promise.id = %self.inner.id, other.id = %other.inner.id, "adopting");
        self.inner.state.borrow_mut().adopting = true;

        // settled values never start with a promise, so these skip adoption and the lock
        let on_resolve: Handler = {
            let this = self.clone();
            Box::new(move |values| {
                this.settle(Status::Resolved, values);
                Ok(Values::new())
            })
        };
        let on_reject: Handler = {
            let this = self.clone();
            Box::new(move |values| {
                this.settle(Status::Rejected, chained_rejection(values));
                Ok(Values::new())
            })
        };

        let chained = other.chain(Some(on_resolve), Some(on_reject), self.inner.location);
        match chained.status() {
            Status::Cancelled => self.cancel(),
            Status::Pending => {
                self.inner.state.borrow_mut().parent = Some(Rc::downgrade(&chained.inner));
                chained
                    .inner
                    .state
                    .borrow_mut()
                    .consumers
                    .push(Rc::downgrade(&self.inner));
            }
            Status::Resolved | Status::Rejected => {}
        }
    }

    fn settle(&self, status: Status, values: Values) {
        let reactions = {
            let mut state = self.inner.state.borrow_mut();
            if state.status != Status::Pending {
                tracing::trace!(
                    promise.id = %self.inner.id,
                    ?status,
                    current = ?state.status,
                    "ignoring settlement of a settled promise"
                );
                return;
            }
            state.status = status;
            state.values = values.clone();
            state.parent = None;
            state.consumers.clear();
            state.cancel_hook = None;
            // the executor keeps running until its next suspension point, it just
            // can't be cancelled anymore
            state.task = None;
            mem::take(&mut state.reactions)
        };
        tracing::trace!(promise.id = %self.inner.id, ?status, "settled");

        if status == Status::Rejected && !reactions.iter().any(|r| matches!(r, Reaction::Link(_))) {
            self.inner.handle.track_rejection(self.clone());
        }

        self.dispatch(status, &values, reactions);
    }

    fn dispatch(&self, status: Status, values: &Values, reactions: Vec<Reaction>) {
        let mut finalizers = Vec::new();

        for reaction in reactions {
            match reaction {
                Reaction::Link(link) if status == Status::Cancelled => link.derived.cancel(),
                Reaction::Link(link) => {
                    let values = values.clone();
                    self.inner.handle.defer(move || link.run(status, values));
                }
                Reaction::Wake(waker) => waker.wake(),
                Reaction::Finally(finalizer) => finalizers.push(finalizer),
            }
        }

        for finalizer in finalizers {
            let values = values.clone();
            self.inner.handle.defer(move || finalizer(status, values));
        }
    }

    /// Cancels this promise if it is still pending.
    ///
    /// This runs the cancellation hook (if any), abandons the executor task, cancels every
    /// promise derived from this one and, once the parent has no live consumers left, the
    /// parent as well. `finally` handlers then run with [`Status::Cancelled`].
    ///
    /// Cancelling a settled promise does nothing.
    pub fn cancel(&self) {
        let (hook, task, parent, consumers, reactions) = {
            let mut state = self.inner.state.borrow_mut();
            if state.status != Status::Pending {
                return;
            }
            state.status = Status::Cancelled;
            (
                state.cancel_hook.take(),
                state.task.take(),
                state.parent.take(),
                mem::take(&mut state.consumers),
                mem::take(&mut state.reactions),
            )
        };
        tracing::trace!(promise.id = %self.inner.id, "cancelled");

        if let Some(hook) = hook {
            run_hook(self, hook);
        }

        if let Some(task) = task {
            self.inner.handle.abort_task(task);
        }

        if let Some(parent) = parent.and_then(|parent| parent.upgrade()) {
            Promise::from_inner(parent).consumer_cancelled(self);
        }

        for consumer in consumers {
            if let Some(consumer) = consumer.upgrade() {
                Promise::from_inner(consumer).cancel();
            }
        }

        self.dispatch(Status::Cancelled, &Values::new(), reactions);
    }

    /// Forgets `consumer` and cancels this promise if that left it without consumers.
    pub(crate) fn consumer_cancelled(&self, consumer: &Promise) {
        let (orphaned, _removed) = {
            let mut state = self.inner.state.borrow_mut();
            if state.status != Status::Pending {
                return;
            }

            state.consumers.retain(|weak| {
                weak.strong_count() > 0 && !core::ptr::eq(weak.as_ptr(), Rc::as_ptr(&consumer.inner))
            });
            let (removed, kept): (Vec<_>, Vec<_>) = mem::take(&mut state.reactions)
                .into_iter()
                .partition(|reaction| reaction.links_to(&consumer.inner));
            state.reactions = kept;

            (state.consumers.is_empty(), removed)
        };

        tracing::trace!(
            promise.id = %self.inner.id,
            consumer.id = %consumer.inner.id,
            orphaned,
            "consumer cancelled"
        );

        if orphaned {
            self.cancel();
        }
    }

    /// Registers a consumer link, the core of [`Promise::then`].
    pub(crate) fn chain(
        &self,
        on_resolve: Option<Handler>,
        on_reject: Option<Handler>,
        location: &'static Location<'static>,
    ) -> Promise {
        let derived = Promise::pending(self.inner.handle.clone(), location);
        let link = Link {
            derived: derived.clone(),
            on_resolve,
            on_reject,
        };

        let mut state = self.inner.state.borrow_mut();
        state.observed = true;
        let status = state.status;
        match status {
            Status::Pending => {
                derived.inner.state.borrow_mut().parent = Some(Rc::downgrade(&self.inner));
                state.consumers.push(Rc::downgrade(&derived.inner));
                state.reactions.push(Reaction::Link(link));
            }
            Status::Cancelled => {
                drop(state);
                drop(link);
                derived.cancel();
            }
            Status::Resolved | Status::Rejected => {
                let values = state.values.clone();
                drop(state);
                self.inner.handle.defer(move || link.run(status, values));
            }
        }

        derived
    }

    pub(super) fn add_finalizer(&self, finalizer: Finalizer) {
        let mut state = self.inner.state.borrow_mut();
        state.observed = true;
        let status = state.status;
        if status == Status::Pending {
            state.reactions.push(Reaction::Finally(finalizer));
        } else {
            let values = state.values.clone();
            drop(state);
            self.inner.handle.defer(move || finalizer(status, values));
        }
    }

    pub(super) fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<(Status, Values)> {
        let mut state = self.inner.state.borrow_mut();
        state.observed = true;
        if state.status != Status::Pending {
            return Poll::Ready((state.status, state.values.clone()));
        }

        let registered = state
            .reactions
            .iter()
            .any(|r| matches!(r, Reaction::Wake(waker) if waker.will_wake(cx.waker())));
        if !registered {
            state.reactions.push(Reaction::Wake(cx.waker().clone()));
        }

        Poll::Pending
    }
}

fn run_hook(promise: &Promise, hook: Box<dyn FnOnce()>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
        let err = Error::from_panic(payload.as_ref(), promise.inner.location);
        tracing::error!(promise.id = %promise.inner.id, "cancellation hook failed: {err}");
    }
}

/// Marks an execution error as having travelled through an adopted promise.
fn chained_rejection(mut values: Values) -> Values {
    let extended = match values.first() {
        Some(Value::Error(err)) if *err.kind() == ErrorKind::ExecutionError => err
            .extend()
            .with_message("this promise was chained to a promise that errored"),
        _ => return values,
    };
    values[0] = extended.into();
    values
}
