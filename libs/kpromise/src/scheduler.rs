// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::RefCell;
use core::fmt;
use core::mem;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::task::{PollResult, TaskRef, Tasks};

/// Summary of one [`Executor::tick`](crate::executor::Executor::tick).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Tick {
    /// The number of timer entries that fired.
    pub timers: usize,
    /// The number of deferred jobs (handler invocations and the like) that ran.
    pub jobs: usize,
    /// The number of task polls.
    pub polled: usize,
    /// The number of rejections reported as unhandled.
    pub unhandled: usize,
    /// Whether work is already queued for the next tick.
    pub has_remaining: bool,
}

pub(crate) type Job = Box<dyn FnOnce()>;

/// The executor's run queue.
///
/// Deferred jobs and task polls share one FIFO queue so that everything runs in the order it
/// was scheduled. Tasks get into the queue through the thread-safe [`WakeQueue`], which is
/// flushed into the run queue before every step.
pub(crate) struct Scheduler {
    run_queue: RefCell<VecDeque<Runnable>>,
}

/// Task references whose wakers fired, possibly from another thread.
#[derive(Default)]
pub(crate) struct WakeQueue {
    tasks: Mutex<VecDeque<TaskRef>>,
}

enum Runnable {
    Job(Job),
    Poll(TaskRef),
}

// === impl Tick ===

impl Tick {
    /// Whether anything at all happened during this tick.
    pub fn did_work(&self) -> bool {
        self.timers > 0 || self.jobs > 0 || self.polled > 0
    }
}

// === impl Scheduler ===

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            run_queue: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn defer(&self, job: Job) {
        self.run_queue.borrow_mut().push_back(Runnable::Job(job));
    }

    /// Runs queued jobs and polls woken tasks until both queues are empty.
    ///
    /// Tasks that woke themselves during their poll are put back for the next tick, everything
    /// else scheduled while draining runs in this same pass.
    pub(crate) fn drain(&self, woken: &WakeQueue, tasks: &Tasks, tick: &mut Tick) {
        let mut yielded = HashSet::new();
        let mut next_tick = Vec::new();

        loop {
            self.flush(woken);

            let Some(runnable) = self.run_queue.borrow_mut().pop_front() else {
                break;
            };

            match runnable {
                Runnable::Job(job) => {
                    tick.jobs += 1;
                    job();
                }
                Runnable::Poll(task) => {
                    if yielded.contains(&task.id()) {
                        next_tick.push(task);
                        continue;
                    }

                    tick.polled += 1;
                    if tasks.poll(task) == PollResult::PendingSchedule {
                        yielded.insert(task.id());
                    }
                }
            }
        }

        let mut run_queue = self.run_queue.borrow_mut();
        run_queue.extend(next_tick.into_iter().map(Runnable::Poll));
        tick.has_remaining = !run_queue.is_empty();
    }

    /// Removes everything from the run queue, returning the jobs so they can be dropped outside
    /// of any borrow.
    pub(crate) fn clear(&self) -> Vec<Job> {
        mem::take(&mut *self.run_queue.borrow_mut())
            .into_iter()
            .filter_map(|runnable| match runnable {
                Runnable::Job(job) => Some(job),
                Runnable::Poll(_) => None,
            })
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.run_queue.borrow().is_empty()
    }

    fn flush(&self, woken: &WakeQueue) {
        let woken = woken.take();
        if !woken.is_empty() {
            self.run_queue
                .borrow_mut()
                .extend(woken.into_iter().map(Runnable::Poll));
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("run_queue", &self.run_queue.borrow().len())
            .finish()
    }
}

// === impl WakeQueue ===

impl WakeQueue {
    pub(crate) fn push(&self, task: TaskRef) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }

    pub(crate) fn take(&self) -> Vec<TaskRef> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.drain(..).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl fmt::Debug for WakeQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeQueue").finish_non_exhaustive()
    }
}
