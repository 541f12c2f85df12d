// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use super::{Promise, Status};
use crate::value::IntoValues;

/// The settle capability handed to a promise's executor.
///
/// Only the first `resolve` or `reject` has an effect; later calls, and calls after the promise
/// was cancelled, are ignored.
#[derive(Clone)]
pub struct Resolver {
    promise: Promise,
}

impl Resolver {
    pub(super) fn new(promise: Promise) -> Self {
        Self { promise }
    }

    /// Resolves the promise. If the first value is a [`Promise`] it is adopted instead.
    pub fn resolve(&self, values: impl IntoValues) {
        self.promise.resolve_values(values.into_values());
    }

    /// Rejects the promise with `values`, unchanged.
    pub fn reject(&self, values: impl IntoValues) {
        self.promise.reject_values(values.into_values());
    }

    /// Sets the hook that runs if the promise is cancelled while still pending.
    ///
    /// The most recently supplied hook wins. If the promise is already cancelled the hook runs
    /// immediately. Returns whether the promise was already cancelled.
    pub fn on_cancel(&self, hook: impl FnOnce() + 'static) -> bool {
        self.promise.set_cancel_hook(Box::new(hook))
    }

    /// Returns whether the promise has been cancelled, without touching the cancellation hook.
    pub fn is_cancelled(&self) -> bool {
        self.promise.status() == Status::Cancelled
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("promise", &self.promise)
            .finish()
    }
}
