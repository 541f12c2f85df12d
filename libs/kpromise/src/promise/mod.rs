// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod link;
mod resolver;
mod settled;
mod state;

use core::cell::RefCell;
use core::fmt;
use core::panic::{AssertUnwindSafe, Location};
use core::sync::atomic::{AtomicU64, Ordering};
use std::panic;
use std::rc::Rc;

pub(crate) use link::Handler;
pub use resolver::Resolver;
pub use settled::{Expect, Settled, Wait};
use smallvec::smallvec;
use state::Inner;

use crate::error::{Error, ErrorKind};
use crate::executor::Handle;
use crate::task::TaskFuture;
use crate::value::{IntoOutcome, IntoValues, Value, Values};

/// The settlement status of a [`Promise`].
///
/// A promise starts out [`Status::Pending`] and transitions exactly once into one of the
/// other states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Resolved,
    Rejected,
    Cancelled,
}

/// An opaque ID that uniquely identifies a promise.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Id(u64);

/// A value that will exist later, or a failure.
///
/// `Promise` is a cheap, reference-counted handle; clones refer to the same promise. Promises
/// are bound to the [`Executor`](crate::executor::Executor) that was current when they were
/// created and must not leave its thread.
#[derive(Clone)]
pub struct Promise {
    inner: Rc<Inner>,
}

static_assertions::assert_not_impl_any!(Promise: Send, Sync);
static_assertions::assert_not_impl_any!(Resolver: Send, Sync);

// === impl Status ===

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Status::Pending => "Pending",
            Status::Resolved => "Resolved",
            Status::Rejected => "Rejected",
            Status::Cancelled => "Cancelled",
        })
    }
}

// === impl Id ===

impl Id {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// === impl Promise ===

impl Promise {
    /// Creates a promise driven by a cooperative executor.
    ///
    /// `executor` receives the promise's [`Resolver`] and returns the future that settles it.
    /// That future is spawned as a task and polled once right away, so `new` returns as soon as
    /// the executor first suspends (or finishes). Returning `Err`, or panicking, rejects the
    /// promise; non-[`Error`] failures are wrapped in an [`ErrorKind::ExecutionError`].
    ///
    /// If the promise is cancelled the executor's future is dropped at its current suspension
    /// point and never resumed.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of an [`Executor`](crate::executor::Executor).
    #[track_caller]
    pub fn new<E, F>(executor: E) -> Self
    where
        E: FnOnce(Resolver) -> F + 'static,
        F: Future<Output = Result<(), Value>> + 'static,
    {
        Self::spawn_executor(Handle::current(), Location::caller(), executor, false)
    }

    /// Like [`Promise::new`], but the executor's first poll is deferred to the executor's job
    /// queue instead of happening synchronously.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of an [`Executor`](crate::executor::Executor).
    #[track_caller]
    pub fn defer<E, F>(executor: E) -> Self
    where
        E: FnOnce(Resolver) -> F + 'static,
        F: Future<Output = Result<(), Value>> + 'static,
    {
        Self::spawn_executor(Handle::current(), Location::caller(), executor, true)
    }

    fn spawn_executor<E, F>(
        handle: Handle,
        location: &'static Location<'static>,
        executor: E,
        deferred: bool,
    ) -> Self
    where
        E: FnOnce(Resolver) -> F + 'static,
        F: Future<Output = Result<(), Value>> + 'static,
    {
        let promise = Promise::pending(handle, location);
        let resolver = Resolver::new(promise.clone());
        let future = TaskFuture::new(promise.clone(), async move { executor(resolver).await });

        let Some(task) = promise.handle().spawn(future) else {
            tracing::warn!(promise.id = %promise.id(), "executor is gone, promise will never settle");
            return promise;
        };
        promise.set_task(task);

        if deferred {
            promise.handle().schedule(task);
        } else {
            promise.handle().poll_task(task);
        }

        promise
    }

    /// Creates a promise from a synchronous executor, which runs before this returns.
    ///
    /// Returning `Err`, or panicking, rejects the promise like in [`Promise::new`].
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of an [`Executor`](crate::executor::Executor).
    #[track_caller]
    pub fn with_resolver<E>(executor: E) -> Self
    where
        E: FnOnce(&Resolver) -> Result<(), Value>,
    {
        let location = Location::caller();
        let promise = Promise::pending(Handle::current(), location);
        let resolver = Resolver::new(promise.clone());

        match panic::catch_unwind(AssertUnwindSafe(|| executor(&resolver))) {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => promise.reject_values(smallvec![Error::normalize(failure, location)]),
            Err(payload) => {
                let err = Error::from_panic(payload.as_ref(), location);
                promise.reject_values(smallvec![err.into()]);
            }
        }

        promise
    }

    /// Begins a promise chain from a future.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of an [`Executor`](crate::executor::Executor).
    #[track_caller]
    pub fn spawn<F, R>(future: F) -> Self
    where
        F: Future<Output = R> + 'static,
        R: IntoOutcome,
    {
        Self::spawn_at(Location::caller(), future)
    }

    #[track_caller]
    pub(crate) fn spawn_at<F, R>(location: &'static Location<'static>, future: F) -> Self
    where
        F: Future<Output = R> + 'static,
        R: IntoOutcome,
    {
        let executor = move |resolver: Resolver| async move {
            let values = future.await.into_outcome()?;
            resolver.resolve(values);
            Ok::<_, Value>(())
        };
        Self::spawn_executor(Handle::current(), location, executor, false)
    }

    /// Begins a promise chain from a synchronous callback.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of an [`Executor`](crate::executor::Executor).
    #[track_caller]
    pub fn from_fn<F, R>(f: F) -> Self
    where
        F: FnOnce() -> R,
        R: IntoOutcome,
    {
        Self::with_resolver(move |resolver| {
            resolver.resolve(f().into_outcome()?);
            Ok(())
        })
    }

    /// Returns an already resolved promise. A [`Promise`] argument is adopted instead.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of an [`Executor`](crate::executor::Executor).
    #[track_caller]
    pub fn resolve(values: impl IntoValues) -> Self {
        let promise = Promise::pending(Handle::current(), Location::caller());
        promise.resolve_values(values.into_values());
        promise
    }

    /// Returns an already rejected promise.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of an [`Executor`](crate::executor::Executor).
    #[track_caller]
    pub fn reject(values: impl IntoValues) -> Self {
        Self::rejected_in(Handle::current(), Location::caller(), values.into_values())
    }

    fn rejected_in(handle: Handle, location: &'static Location<'static>, values: Values) -> Self {
        let promise = Promise::pending(handle, location);
        promise.reject_values(values);
        promise
    }

    /// Returns whether `value` is a promise.
    pub fn is(value: &Value) -> bool {
        matches!(value, Value::Promise(_))
    }

    pub fn id(&self) -> Id {
        self.inner.id
    }

    /// The source location this promise was created at.
    pub fn location(&self) -> &'static Location<'static> {
        self.inner.location
    }

    pub fn status(&self) -> Status {
        self.inner.state.borrow().status
    }

    /// The values this promise settled with; empty while pending or after cancellation.
    pub fn values(&self) -> Values {
        self.inner.state.borrow().values.clone()
    }

    /// Chains `on_resolve` and `on_reject` onto this promise.
    ///
    /// The matching handler runs on a later pass of the job queue once this promise settles,
    /// never synchronously. The returned promise settles with the handler's outcome, adopting
    /// it if it is a promise. If this promise is already cancelled the returned promise is
    /// cancelled too and neither handler runs.
    #[track_caller]
    pub fn then<F, G, R1, R2>(&self, on_resolve: F, on_reject: G) -> Promise
    where
        F: FnOnce(Values) -> R1 + 'static,
        G: FnOnce(Values) -> R2 + 'static,
        R1: IntoOutcome,
        R2: IntoOutcome,
    {
        self.chain(
            Some(Box::new(move |values| on_resolve(values).into_outcome())),
            Some(Box::new(move |values| on_reject(values).into_outcome())),
            Location::caller(),
        )
    }

    /// Chains a resolution handler; rejections pass through to the returned promise.
    #[track_caller]
    pub fn and_then<F, R>(&self, on_resolve: F) -> Promise
    where
        F: FnOnce(Values) -> R + 'static,
        R: IntoOutcome,
    {
        self.chain(
            Some(Box::new(move |values| on_resolve(values).into_outcome())),
            None,
            Location::caller(),
        )
    }

    /// Chains a rejection handler; resolutions pass through to the returned promise.
    #[track_caller]
    pub fn catch<F, R>(&self, on_reject: F) -> Promise
    where
        F: FnOnce(Values) -> R + 'static,
        R: IntoOutcome,
    {
        self.chain(
            None,
            Some(Box::new(move |values| on_reject(values).into_outcome())),
            Location::caller(),
        )
    }

    /// Runs `tap` with the resolved values and passes them on unchanged.
    ///
    /// If `tap` returns a promise, the returned promise waits for it before passing the
    /// original values on.
    #[track_caller]
    pub fn tap<F, R>(&self, tap: F) -> Promise
    where
        F: FnOnce(&Values) -> R + 'static,
        R: IntoOutcome,
    {
        self.and_then(move |values: Values| -> Result<Values, Value> {
            let returned = tap(&values).into_outcome()?;
            match returned.first() {
                Some(Value::Promise(promise)) => {
                    Ok(smallvec![promise.and_then_return(values).into()])
                }
                _ => Ok(values),
            }
        })
    }

    /// Like [`Promise::and_then`], but `f` does not receive the resolved values.
    #[track_caller]
    pub fn and_then_call<F, R>(&self, f: F) -> Promise
    where
        F: FnOnce() -> R + 'static,
        R: IntoOutcome,
    {
        self.and_then(move |_: Values| f())
    }

    /// Resolves with `values` once this promise resolves.
    #[track_caller]
    pub fn and_then_return(&self, values: impl IntoValues + 'static) -> Promise {
        self.and_then(move |_: Values| values.into_values())
    }

    /// Runs `handler` once this promise settles, whichever way, including cancellation.
    ///
    /// The returned promise mirrors this promise's outcome. If `handler` returns a promise the
    /// mirror waits for it; its resolved values are discarded, a rejection replaces the
    /// mirrored outcome.
    ///
    /// A `finally` promise is not a consumer of this promise: it doesn't keep this promise
    /// from being cancelled when every other consumer is. Cancelling the returned promise
    /// cancels a promise returned by the handler, and cancels this promise too if it has no
    /// consumers left.
    #[track_caller]
    pub fn finally<F, R>(&self, handler: F) -> Promise
    where
        F: FnOnce(Status) -> R + 'static,
        R: IntoOutcome,
    {
        let location = Location::caller();
        let derived = Promise::pending(self.inner.handle.clone(), location);
        let returned: Rc<RefCell<Option<Promise>>> = Rc::default();

        derived.set_cancel_hook(Box::new({
            let parent = Rc::downgrade(&self.inner);
            let derived = Rc::downgrade(&derived.inner);
            let returned = returned.clone();
            move || {
                if let (Some(parent), Some(derived)) = (parent.upgrade(), derived.upgrade()) {
                    Promise::from_inner(parent).consumer_cancelled(&Promise::from_inner(derived));
                }
                let returned = returned.borrow_mut().take();
                if let Some(returned) = returned {
                    returned.cancel();
                }
            }
        }));

        let mirror = derived.clone();
        self.add_finalizer(Box::new(move |status, values| {
            match panic::catch_unwind(AssertUnwindSafe(move || handler(status).into_outcome())) {
                Ok(Ok(outcome)) => match outcome.first() {
                    Some(Value::Promise(promise)) => {
                        *returned.borrow_mut() = Some(promise.clone());
                        promise.add_finalizer(Box::new(move |returned_status, returned_values| {
                            if returned_status == Status::Rejected {
                                mirror.reject_values(returned_values);
                            } else {
                                mirror.mirror(status, values);
                            }
                        }));
                    }
                    _ => mirror.mirror(status, values),
                },
                Ok(Err(failure)) => {
                    mirror.reject_values(smallvec![Error::normalize(failure, location)]);
                }
                Err(payload) => {
                    let err = Error::from_panic(payload.as_ref(), location);
                    mirror.reject_values(smallvec![err.into()]);
                }
            }
        }));

        derived
    }

    /// Like [`Promise::finally`], but `f` does not receive the status.
    #[track_caller]
    pub fn finally_call<F, R>(&self, f: F) -> Promise
    where
        F: FnOnce() -> R + 'static,
        R: IntoOutcome,
    {
        self.finally(move |_| f())
    }

    fn mirror(&self, status: Status, values: Values) {
        match status {
            Status::Resolved => self.resolve_values(values),
            Status::Rejected => self.reject_values(values),
            Status::Cancelled => self.cancel(),
            Status::Pending => unreachable!("finalizers only run for settled promises"),
        }
    }

    /// Returns a promise that resolves if this promise is *already* resolved, and rejects
    /// otherwise.
    ///
    /// The rejection is `rejection` if given, else an [`ErrorKind::NotResolvedInTime`] error.
    #[track_caller]
    pub fn now(&self, rejection: Option<Value>) -> Promise {
        let location = Location::caller();
        if self.status() == Status::Resolved {
            return self.and_then(|values: Values| values);
        }

        let rejection = rejection.unwrap_or_else(|| {
            Error::at(ErrorKind::NotResolvedInTime, location)
                .with_message("this promise was not resolved in time for now()")
                .with_context(format!("now() called at {location}"))
                .into()
        });
        Self::rejected_in(self.inner.handle.clone(), location, smallvec![rejection])
    }

    /// Waits for this promise to settle, returning whether it resolved along with its values.
    ///
    /// Cancellation is reported as `false`, like a rejection.
    pub fn wait(&self) -> Wait {
        Wait::new(self.clone())
    }

    /// Waits for this promise to settle, returning its exact status and values.
    pub fn wait_status(&self) -> Settled {
        Settled::new(self.clone())
    }

    /// Waits for this promise to resolve.
    ///
    /// A rejection is returned as the `Err` variant (the first rejection value), cancellation
    /// as an [`ErrorKind::AlreadyCancelled`] error. `.await`ing a `Promise` is equivalent.
    pub fn expect(&self) -> Expect {
        Expect::new(self.clone())
    }
}

impl PartialEq for Promise {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Promise {}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Promise")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("values", &state.values)
            .field("consumers", &state.consumers.len())
            .field("location", &self.inner.location)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::test_util::Harness;

    fn manual() -> (Promise, Resolver) {
        let mut slot = None;
        let promise = Promise::with_resolver(|resolver| {
            slot = Some(resolver.clone());
            Ok(())
        });
        (promise, slot.unwrap())
    }

    #[test]
    fn finally_waits_for_a_returned_promise_and_discards_its_values() {
        let h = Harness::new();
        let cleanup = Promise::delay(Duration::from_millis(5)).and_then_return("cleanup");

        let finally = Promise::resolve("parent").finally({
            let cleanup = cleanup.clone();
            move |_| cleanup
        });

        h.run();
        assert_eq!(finally.status(), Status::Pending);

        h.advance(Duration::from_millis(5));
        assert_eq!(cleanup.status(), Status::Resolved);
        assert_eq!(finally.status(), Status::Resolved);
        assert_eq!(finally.values().as_slice(), [Value::from("parent")]);
    }

    #[test]
    fn finally_takes_the_rejection_of_a_returned_promise() {
        let h = Harness::new();
        let (cleanup, cleanup_resolver) = manual();

        let finally = Promise::resolve("parent").finally({
            let cleanup = cleanup.clone();
            move |_| cleanup
        });

        h.run();
        assert_eq!(finally.status(), Status::Pending);

        cleanup_resolver.reject("cleanup failed");
        h.run();
        assert_eq!(finally.status(), Status::Rejected);
        assert_eq!(finally.values().as_slice(), [Value::from("cleanup failed")]);
    }

    #[test]
    fn finally_takes_an_already_rejected_promise() {
        let h = Harness::new();

        let finally = Promise::reject("parent").finally(|_| Promise::reject("cleanup failed"));

        h.run();
        assert_eq!(finally.status(), Status::Rejected);
        assert_eq!(finally.values().as_slice(), [Value::from("cleanup failed")]);
    }

    #[test]
    fn cancelling_finally_cancels_the_returned_promise() {
        let h = Harness::new();
        let (cleanup, _cleanup_resolver) = manual();

        let finally = Promise::resolve("parent").finally({
            let cleanup = cleanup.clone();
            move |_| cleanup
        });

        h.run();
        assert_eq!(cleanup.status(), Status::Pending);

        finally.cancel();
        h.run();
        assert_eq!(finally.status(), Status::Cancelled);
        assert_eq!(cleanup.status(), Status::Cancelled);
    }

    #[test]
    fn adopting_ignores_later_resolutions() {
        let h = Harness::new();
        let (outer, resolver) = manual();
        let (inner, inner_resolver) = manual();

        resolver.resolve(inner.clone());
        resolver.resolve("second");
        h.run();
        assert_eq!(outer.status(), Status::Pending);

        inner_resolver.resolve("first");
        h.run();
        assert_eq!(outer.status(), Status::Resolved);
        assert_eq!(outer.values().as_slice(), [Value::from("first")]);
    }

    #[test]
    fn adopting_ignores_later_rejections() {
        let h = Harness::new();
        let (outer, resolver) = manual();
        let inner = Promise::delay(Duration::from_millis(5)).and_then_return("inner");

        resolver.resolve(inner);
        resolver.reject("late");
        h.run();
        assert_eq!(outer.status(), Status::Pending);

        h.advance(Duration::from_millis(5));
        assert_eq!(outer.status(), Status::Resolved);
        assert_eq!(outer.values().as_slice(), [Value::from("inner")]);
    }

    #[test]
    fn adopting_still_follows_a_rejection() {
        let h = Harness::new();
        let (outer, resolver) = manual();
        let (inner, inner_resolver) = manual();

        resolver.resolve(inner);
        resolver.resolve("second");
        inner_resolver.reject("inner failed");
        h.run();
        assert_eq!(outer.status(), Status::Rejected);
        assert_eq!(outer.values().as_slice(), [Value::from("inner failed")]);
    }
}
