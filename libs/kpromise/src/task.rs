// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Tasks drive the cooperative executors of promises.
//!
//! Every [`Promise::new`](crate::Promise::new) spawns its executor future as a task on the
//! current executor. Tasks are polled by the executor whenever their waker fires and are
//! dropped mid-flight when their promise is cancelled.

mod id;
mod yield_now;

use core::cell::RefCell;
use core::fmt;
use core::panic::AssertUnwindSafe;
use core::pin::Pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::{Context, Poll};
use std::panic;
use std::sync::{Arc, Weak};

use futures::future::LocalBoxFuture;
use futures::task::ArcWake;
pub use id::Id;
use pin_project::pin_project;
use smallvec::smallvec;
use wasmtime_slab::Slab;
pub use yield_now::yield_now;

use crate::error::Error;
use crate::promise::Promise;
use crate::scheduler::WakeQueue;
use crate::value::Value;

/// Outcome of calling [`Tasks::poll`].
///
/// This type describes how to proceed with a given task, whether it needs to be rescheduled
/// or can be dropped etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollResult {
    /// The task has completed and was removed from the task table.
    Ready,

    /// The task is pending, but not woken.
    ///
    /// Whoever intends to wake the task later is holding a clone of its waker.
    Pending,

    /// The task has woken itself during the poll.
    ///
    /// The scheduler should poll it again on the next tick, rather than right away.
    PendingSchedule,

    /// The task doesn't exist (anymore), or is already being polled further up the stack.
    Gone,
}

/// A reference to a spawned task.
///
/// `TaskRef`s are plain keys into the executor's task table, paired with the task's [`Id`] so
/// that a reference outliving its task never reaches a newer task reusing the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TaskRef {
    key: wasmtime_slab::Id,
    id: Id,
}

/// The future a promise executor runs as, settling the promise if the executor fails.
#[pin_project]
pub(crate) struct TaskFuture<F> {
    promise: Promise,
    #[pin]
    future: F,
}

/// The executor's table of live tasks.
pub(crate) struct Tasks {
    slab: RefCell<Slab<Task>>,
    queue: Weak<WakeQueue>,
}

struct Task {
    id: Id,
    /// `None` while the task is being polled.
    future: Option<LocalBoxFuture<'static, ()>>,
    waker: Arc<TaskWaker>,
}

struct TaskWaker {
    task: TaskRef,
    /// Set while the task sits in the wake queue, so repeated wakes enqueue it only once.
    scheduled: AtomicBool,
    queue: Weak<WakeQueue>,
}

// === impl TaskRef ===

impl TaskRef {
    pub(crate) fn id(&self) -> Id {
        self.id
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.id)
    }
}

// === impl TaskFuture ===

impl<F> TaskFuture<F>
where
    F: Future<Output = Result<(), Value>>,
{
    pub(crate) fn new(promise: Promise, future: F) -> Self {
        Self { promise, future }
    }
}

impl<F> Future for TaskFuture<F>
where
    F: Future<Output = Result<(), Value>>,
{
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let future = this.future;
        let promise = this.promise;
        let location = promise.location();

        match panic::catch_unwind(AssertUnwindSafe(move || future.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            // returning without settling is fine, the promise simply stays pending
            Ok(Poll::Ready(Ok(()))) => Poll::Ready(()),
            Ok(Poll::Ready(Err(failure))) => {
                promise.reject_values(smallvec![Error::normalize(failure, location)]);
                Poll::Ready(())
            }
            Err(payload) => {
                let err = Error::from_panic(payload.as_ref(), location);
                tracing::debug!(promise.id = %promise.id(), "promise executor panicked: {err}");
                promise.reject_values(smallvec![err.into()]);
                Poll::Ready(())
            }
        }
    }
}

// === impl Tasks ===

impl Tasks {
    pub(crate) fn new(queue: Weak<WakeQueue>) -> Self {
        Self {
            slab: RefCell::new(Slab::new()),
            queue,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.borrow().len()
    }

    pub(crate) fn spawn(&self, future: LocalBoxFuture<'static, ()>) -> TaskRef {
        let mut slab = self.slab.borrow_mut();
        let task = TaskRef {
            key: slab.next_id(),
            id: Id::next(),
        };

        let key = slab.alloc(Task {
            id: task.id,
            future: Some(future),
            waker: Arc::new(TaskWaker {
                task,
                scheduled: AtomicBool::new(false),
                queue: self.queue.clone(),
            }),
        });
        debug_assert_eq!(key, task.key);

        tracing::trace!(%task, "spawned task");
        task
    }

    /// Enqueues `task` as if its waker had been woken.
    pub(crate) fn wake(&self, task: TaskRef) {
        let waker = {
            let slab = self.slab.borrow();
            match slab.get(task.key) {
                Some(entry) if entry.id == task.id => entry.waker.clone(),
                _ => return,
            }
        };
        ArcWake::wake_by_ref(&waker);
    }

    pub(crate) fn poll(&self, task: TaskRef) -> PollResult {
        let (mut future, waker) = {
            let mut slab = self.slab.borrow_mut();
            let Some(entry) = slab.get_mut(task.key) else {
                return PollResult::Gone;
            };
            if entry.id != task.id {
                return PollResult::Gone;
            }
            let Some(future) = entry.future.take() else {
                return PollResult::Gone;
            };
            entry.waker.scheduled.store(false, Ordering::Release);
            (future, entry.waker.clone())
        };

        let _span = tracing::trace_span!("poll", %task).entered();
        let std_waker = futures::task::waker(waker.clone());
        let mut cx = Context::from_waker(&std_waker);
        let poll = future.as_mut().poll(&mut cx);

        let mut slab = self.slab.borrow_mut();
        let alive = slab
            .get(task.key)
            .is_some_and(|entry| entry.id == task.id);
        if !alive {
            // aborted while it was being polled, drop it outside the borrow
            drop(slab);
            drop(future);
            tracing::trace!("task was aborted during its poll");
            return PollResult::Gone;
        }

        match poll {
            Poll::Ready(()) => {
                slab.dealloc(task.key);
                tracing::trace!("task completed");
                PollResult::Ready
            }
            Poll::Pending => {
                if let Some(entry) = slab.get_mut(task.key) {
                    entry.future = Some(future);
                }
                if waker.scheduled.load(Ordering::Acquire) {
                    PollResult::PendingSchedule
                } else {
                    PollResult::Pending
                }
            }
        }
    }

    /// Removes `task`, returning its future so the caller can drop it outside of any borrow.
    ///
    /// A task that is currently being polled is removed right away and its future is dropped
    /// by the poller once the poll returns.
    pub(crate) fn abort(&self, task: TaskRef) -> Option<LocalBoxFuture<'static, ()>> {
        let mut slab = self.slab.borrow_mut();
        match slab.get(task.key) {
            Some(entry) if entry.id == task.id => {}
            _ => return None,
        }
        tracing::trace!(%task, "aborting task");
        slab.dealloc(task.key).future
    }

    /// Removes every task, returning their futures.
    pub(crate) fn drain(&self) -> Vec<LocalBoxFuture<'static, ()>> {
        self.slab
            .borrow_mut()
            .drain()
            .filter_map(|(_, task)| task.future)
            .collect()
    }
}

impl fmt::Debug for Tasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tasks")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// === impl TaskWaker ===

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(queue) = arc_self.queue.upgrade() {
            queue.push(arc_self.task);
        } else {
            tracing::trace!(task = %arc_self.task, "woke a task whose executor is gone");
        }
    }
}
