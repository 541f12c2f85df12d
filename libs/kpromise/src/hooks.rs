// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::{Cell, RefCell};
use core::fmt;
use core::panic::AssertUnwindSafe;
use std::panic;
use std::rc::Rc;

use crate::error::Error;
use crate::executor::Handle;
use crate::promise::Promise;
use crate::value::Values;

type HookFn = Rc<dyn Fn(&Promise, &Values)>;

/// The unhandled-rejection hooks registered with one executor.
#[derive(Default)]
pub(crate) struct Hooks {
    next_seq: Cell<u64>,
    hooks: RefCell<Vec<(u64, HookFn)>>,
}

/// Registration of an unhandled-rejection hook.
///
/// The hook stays registered until [`UnhandledRejectionHook::unregister`] is called; dropping
/// the registration does *not* unregister it.
#[must_use = "dropping the registration leaves the hook installed for the executor's lifetime"]
pub struct UnhandledRejectionHook {
    handle: Handle,
    seq: u64,
}

// === impl Hooks ===

impl Hooks {
    pub(crate) fn register(&self, hook: HookFn) -> u64 {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.hooks.borrow_mut().push((seq, hook));
        seq
    }

    pub(crate) fn unregister(&self, seq: u64) -> bool {
        let mut hooks = self.hooks.borrow_mut();
        let Some(pos) = hooks.iter().position(|(s, _)| *s == seq) else {
            return false;
        };
        // dropping the closure could run arbitrary code, so not while borrowed
        let removed = hooks.remove(pos);
        drop(hooks);
        drop(removed);
        true
    }

    /// Calls every hook, in registration order, with the offending promise.
    pub(crate) fn notify(&self, promise: &Promise, values: &Values) {
        let hooks: Vec<HookFn> = self
            .hooks
            .borrow()
            .iter()
            .map(|(_, hook)| hook.clone())
            .collect();

        for hook in hooks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(promise, values))) {
                let err = Error::from_panic(payload.as_ref(), promise.location());
                tracing::error!(promise.id = %promise.id(), "unhandled rejection hook failed: {err}");
            }
        }
    }

    pub(crate) fn clear(&self) -> Vec<(u64, HookFn)> {
        self.hooks.take()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("len", &self.hooks.borrow().len())
            .finish_non_exhaustive()
    }
}

// === impl UnhandledRejectionHook ===

impl UnhandledRejectionHook {
    pub(crate) fn new(handle: Handle, seq: u64) -> Self {
        Self { handle, seq }
    }

    /// Removes the hook again, returning whether it was still registered.
    pub fn unregister(self) -> bool {
        self.handle.unregister_hook(self.seq)
    }
}

impl fmt::Debug for UnhandledRejectionHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnhandledRejectionHook")
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}
