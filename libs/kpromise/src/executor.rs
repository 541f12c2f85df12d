// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The single-threaded engine that drives promises.
//!
//! An [`Executor`] owns everything a promise needs at runtime: the deferred-job queue, the
//! tasks running promise executors, the timer behind [`Promise::delay`] and the
//! unhandled-rejection registry. The host advances it one step at a time with
//! [`Executor::tick`], or lets [`Executor::block_on`] do that until a future completes.

use core::cell::RefCell;
use core::fmt;
use core::marker::PhantomData;
use core::mem;
use core::pin::pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll};
use core::time::Duration;
use std::borrow::Cow;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::thread::{self, Thread};

use futures::future::LocalBoxFuture;
use futures::task::ArcWake;

use crate::hooks::{Hooks, UnhandledRejectionHook};
use crate::promise::Promise;
use crate::scheduler::{Scheduler, Tick, WakeQueue};
use crate::task::{TaskRef, Tasks};
use crate::time::{Clock, TimeError, Timer, TimerHandle};
use crate::value::Values;

thread_local! {
    static CONTEXT: RefCell<Vec<Handle>> = const { RefCell::new(Vec::new()) };
}

/// Drives promises on the current thread.
///
/// Executors are `!Send`: promises are built on `Rc` and `RefCell` and must stay on the thread
/// that created them.
pub struct Executor {
    shared: Rc<Shared>,
}

/// Configures an [`Executor`].
#[derive(Debug, Clone)]
pub struct Builder {
    name: Cow<'static, str>,
    tick_duration: Duration,
    warn_on_unhandled_rejection: bool,
}

/// A non-owning reference to an [`Executor`].
///
/// Every promise holds the handle of the executor it was created on. Operations through a
/// handle whose executor was dropped log a warning and do nothing.
#[derive(Clone)]
pub struct Handle {
    shared: Weak<Shared>,
}

/// Guard returned by [`Executor::enter`]; the executor stays current until it is dropped.
#[must_use = "the executor is only current while the guard is alive"]
pub struct EnterGuard<'a> {
    _executor: PhantomData<&'a Executor>,
}

struct Shared {
    name: Cow<'static, str>,
    warn_on_unhandled_rejection: bool,
    clock: Box<dyn Clock>,
    timer: RefCell<Timer>,
    scheduler: Scheduler,
    woken: Arc<WakeQueue>,
    tasks: Tasks,
    /// Promises that were rejected without anything chained onto them yet.
    rejections: RefCell<Vec<Promise>>,
    hooks: Hooks,
}

struct ThreadWaker {
    thread: Thread,
    woken: AtomicBool,
}

// === impl Executor ===

impl Executor {
    /// Creates an executor with the default configuration, reading time from `clock`.
    #[must_use]
    pub fn new(clock: impl Clock + 'static) -> Self {
        Builder::new().build(clock)
    }

    #[must_use]
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Makes this executor the current one for the calling thread.
    ///
    /// Promise constructors like [`Promise::new`] pick up the current executor. Guards nest;
    /// the innermost entered executor is current.
    pub fn enter(&self) -> EnterGuard<'_> {
        CONTEXT.with_borrow_mut(|stack| stack.push(self.handle()));
        EnterGuard {
            _executor: PhantomData,
        }
    }

    pub fn handle(&self) -> Handle {
        Handle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// The current time according to this executor's clock.
    pub fn now(&self) -> Duration {
        self.shared.clock.now()
    }

    /// When the earliest pending timer is due, measured like [`Executor::now`].
    pub fn next_deadline(&self) -> Option<Duration> {
        let timer = self.shared.timer.borrow();
        timer
            .next_deadline()
            .map(|deadline| timer.ticks_to_duration(deadline))
    }

    /// The number of timer entries waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.shared.timer.borrow().len()
    }

    /// The number of promise executors that haven't finished yet.
    pub fn live_tasks(&self) -> usize {
        self.shared.tasks.len()
    }

    /// Whether work is queued that the next [`Executor::tick`] would run right away.
    pub fn has_pending_work(&self) -> bool {
        !self.shared.scheduler.is_empty() || !self.shared.woken.is_empty()
    }

    /// Registers a hook that is called for every rejection nothing was chained onto by the end
    /// of the tick it happened in.
    ///
    /// Hooks are advisory and run in registration order. They stay registered until
    /// [`UnhandledRejectionHook::unregister`] is called.
    pub fn on_unhandled_rejection(
        &self,
        hook: impl Fn(&Promise, &Values) + 'static,
    ) -> UnhandledRejectionHook {
        let seq = self.shared.hooks.register(Rc::new(hook));
        UnhandledRejectionHook::new(self.handle(), seq)
    }

    /// Performs one time step.
    ///
    /// This fires every due timer in deadline order, then runs deferred jobs and polls woken
    /// tasks until no more work is queued (tasks that yield are polled again on the next
    /// tick), and finally reports rejections that are still unobserved.
    pub fn tick(&self) -> Tick {
        let _span = tracing::debug_span!("tick", executor = %self.shared.name).entered();
        let _enter = self.enter();
        let shared = &*self.shared;
        let mut tick = Tick::default();

        let expired = {
            let now = shared.clock.now();
            let mut timer = shared.timer.borrow_mut();
            let now = timer.duration_to_ticks(now).unwrap_or_else(|_| timer.now());
            timer.turn(now)
        };
        tick.timers = expired.len();
        for entry in expired {
            entry.fire();
        }

        shared.scheduler.drain(&shared.woken, &shared.tasks, &mut tick);

        let rejections = mem::take(&mut *shared.rejections.borrow_mut());
        for promise in rejections {
            if promise.is_observed() {
                continue;
            }
            tick.unhandled += 1;

            let values = promise.values();
            if shared.warn_on_unhandled_rejection {
                tracing::warn!(
                    promise.id = %promise.id(),
                    promise.location = %promise.location(),
                    "unhandled promise rejection: {}",
                    DisplayValues(&values)
                );
            }
            shared.hooks.notify(&promise, &values);
        }

        tick.has_remaining |= !shared.woken.is_empty();
        tracing::debug!(?tick, "tick done");
        tick
    }

    /// Runs ticks until `future` completes, returning its output.
    ///
    /// When there is nothing left to do the thread is parked through the [`Clock`] until the
    /// next timer deadline.
    ///
    /// # Panics
    ///
    /// With a [`ManualClock`](crate::time::ManualClock), panics if the future can never complete
    /// because no work and no timers are left.
    pub fn block_on<F: IntoFuture>(&self, future: F) -> F::Output {
        let _span = tracing::debug_span!("block_on", executor = %self.shared.name).entered();
        let _enter = self.enter();

        let thread_waker = Arc::new(ThreadWaker {
            thread: thread::current(),
            woken: AtomicBool::new(true),
        });
        let waker = futures::task::waker(thread_waker.clone());
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future.into_future());

        loop {
            if thread_waker.woken.swap(false, Ordering::AcqRel) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
            }

            let tick = self.tick();
            if tick.did_work()
                || tick.has_remaining
                || thread_waker.woken.load(Ordering::Acquire)
            {
                continue;
            }

            let deadline = self.next_deadline();
            tracing::trace!(?deadline, "going to sleep");
            self.shared.clock.park_until(deadline);
            tracing::trace!("woke up");
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.shared.name)
            .field("clock", &self.shared.clock.name())
            .field("timer", &self.shared.timer)
            .field("scheduler", &self.shared.scheduler)
            .field("tasks", &self.shared.tasks)
            .field("hooks", &self.shared.hooks)
            .finish_non_exhaustive()
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        let _span = tracing::debug_span!("shutdown", executor = %self.shared.name).entered();
        let shared = &*self.shared;

        // Dropping any of these can cancel promises, which schedules more work. Keep clearing
        // until nothing is left, never dropping anything while a queue is borrowed.
        loop {
            let timers = shared.timer.borrow_mut().clear();
            let jobs = shared.scheduler.clear();
            let tasks = shared.tasks.drain();
            let rejections = mem::take(&mut *shared.rejections.borrow_mut());
            drop(shared.woken.take());

            if timers.is_empty() && jobs.is_empty() && tasks.is_empty() && rejections.is_empty() {
                break;
            }
            tracing::trace!(
                timers = timers.len(),
                jobs = jobs.len(),
                tasks = tasks.len(),
                "dropping leftover work"
            );

            drop(timers);
            drop(jobs);
            drop(tasks);
            drop(rejections);
        }

        drop(shared.hooks.clear());
    }
}

// === impl Builder ===

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: Cow::Borrowed("kpromise"),
            tick_duration: Duration::from_millis(1),
            warn_on_unhandled_rejection: true,
        }
    }

    /// The name used in the executor's tracing spans.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// The resolution of the executor's timer. Defaults to 1 ms.
    #[must_use]
    pub fn tick_duration(mut self, tick_duration: Duration) -> Self {
        self.tick_duration = tick_duration;
        self
    }

    /// Whether unhandled rejections are logged as warnings. Defaults to `true`.
    ///
    /// Registered hooks are called either way.
    #[must_use]
    pub fn warn_on_unhandled_rejection(mut self, warn: bool) -> Self {
        self.warn_on_unhandled_rejection = warn;
        self
    }

    /// # Panics
    ///
    /// Panics if the configured tick duration is zero.
    #[must_use]
    pub fn build(self, clock: impl Clock + 'static) -> Executor {
        tracing::debug!(
            name = %self.name,
            clock = clock.name(),
            tick_duration = ?self.tick_duration,
            "creating executor"
        );

        let woken = Arc::new(WakeQueue::default());
        let tasks = Tasks::new(Arc::downgrade(&woken));

        Executor {
            shared: Rc::new(Shared {
                name: self.name,
                warn_on_unhandled_rejection: self.warn_on_unhandled_rejection,
                clock: Box::new(clock),
                timer: RefCell::new(Timer::new(self.tick_duration)),
                scheduler: Scheduler::new(),
                woken,
                tasks,
                rejections: RefCell::new(Vec::new()),
                hooks: Hooks::default(),
            }),
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

// === impl Handle ===

impl Handle {
    /// Returns the handle of the current executor.
    ///
    /// # Panics
    ///
    /// Panics if no executor was entered on this thread, see [`Executor::enter`].
    #[track_caller]
    pub fn current() -> Self {
        Self::try_current()
            .expect("no executor entered on this thread, call `Executor::enter` first")
    }

    /// Returns the handle of the current executor, if any.
    pub fn try_current() -> Option<Self> {
        CONTEXT.with_borrow(|stack| stack.last().cloned())
    }

    /// The current time according to the executor's clock, `None` if it is gone.
    pub fn now(&self) -> Option<Duration> {
        self.with_shared("now", |shared| shared.clock.now())
    }

    pub(crate) fn defer(&self, job: impl FnOnce() + 'static) {
        self.with_shared("defer", |shared| shared.scheduler.defer(Box::new(job)));
    }

    pub(crate) fn spawn(&self, future: impl Future<Output = ()> + 'static) -> Option<TaskRef> {
        let future: LocalBoxFuture<'static, ()> = Box::pin(future);
        self.with_shared("spawn", |shared| shared.tasks.spawn(future))
    }

    /// Polls `task` right away, outside of any tick.
    pub(crate) fn poll_task(&self, task: TaskRef) {
        if let Some(shared) = self.upgrade("poll_task") {
            shared.tasks.poll(task);
        }
    }

    /// Schedules a poll of `task` for the next drain of the run queue.
    pub(crate) fn schedule(&self, task: TaskRef) {
        self.with_shared("schedule", |shared| shared.tasks.wake(task));
    }

    pub(crate) fn abort_task(&self, task: TaskRef) {
        let future = self.with_shared("abort_task", |shared| shared.tasks.abort(task));
        drop(future);
    }

    pub(crate) fn track_rejection(&self, promise: Promise) {
        self.with_shared("track_rejection", |shared| {
            shared.rejections.borrow_mut().push(promise);
        });
    }

    /// Schedules `callback` to run on the first tick at least `delay` from now.
    pub(crate) fn schedule_timer(
        &self,
        delay: Duration,
        callback: impl FnOnce() + 'static,
    ) -> Result<TimerHandle, TimeError> {
        let shared = self.upgrade("schedule_timer").ok_or(TimeError::Shutdown)?;
        let mut timer = shared.timer.borrow_mut();
        let deadline = timer.deadline_after(shared.clock.now(), delay)?;
        Ok(timer.insert(deadline, callback))
    }

    pub(crate) fn cancel_timer(&self, handle: TimerHandle) -> bool {
        let removed = self.with_shared("cancel_timer", |shared| {
            shared.timer.borrow_mut().remove(handle)
        });
        removed.flatten().is_some()
    }

    pub(crate) fn unregister_hook(&self, seq: u64) -> bool {
        self.with_shared("unregister_hook", |shared| shared.hooks.unregister(seq))
            .unwrap_or(false)
    }

    fn with_shared<R>(&self, op: &'static str, f: impl FnOnce(&Shared) -> R) -> Option<R> {
        self.upgrade(op).map(|shared| f(&shared))
    }

    fn upgrade(&self, op: &'static str) -> Option<Rc<Shared>> {
        let shared = self.shared.upgrade();
        if shared.is_none() {
            tracing::warn!(op, "the executor is gone, ignoring operation");
        }
        shared
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.shared.upgrade().map(|shared| shared.name.clone());
        f.debug_struct("Handle").field("executor", &name).finish()
    }
}

// === impl EnterGuard ===

impl Drop for EnterGuard<'_> {
    fn drop(&mut self) {
        CONTEXT.with_borrow_mut(|stack| stack.pop());
    }
}

impl fmt::Debug for EnterGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnterGuard").finish_non_exhaustive()
    }
}

// === impl ThreadWaker ===

impl ArcWake for ThreadWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::Release);
        arc_self.thread.unpark();
    }
}

struct DisplayValues<'a>(&'a Values);

impl fmt::Display for DisplayValues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            fmt::Display::fmt(value, f)?;
        }
        Ok(())
    }
}
