// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::panic::AssertUnwindSafe;
use std::panic;

use smallvec::smallvec;

use super::{Promise, Status};
use crate::error::Error;
use crate::value::{Value, Values};

pub(crate) type Handler = Box<dyn FnOnce(Values) -> Result<Values, Value>>;

/// The chaining relationship between a parent promise and a promise derived from it.
///
/// The parent owns the link through its reaction list until it settles, or until the derived
/// promise is cancelled and removed again.
pub(crate) struct Link {
    pub(super) derived: Promise,
    pub(super) on_resolve: Option<Handler>,
    pub(super) on_reject: Option<Handler>,
}

impl Link {
    /// Runs the continuation for the parent's settlement and settles the derived promise with
    /// whatever it produced. A missing continuation passes the parent's outcome through.
    pub(super) fn run(self, status: Status, values: Values) {
        debug_assert_ne!(status, Status::Pending);
        debug_assert_ne!(status, Status::Cancelled);

        let derived = self.derived;
        if derived.status() != Status::Pending {
            tracing::trace!(promise.id = %derived.id(), "derived promise settled before its handler ran");
            return;
        }

        let resolved = status == Status::Resolved;
        let handler = if resolved {
            self.on_resolve
        } else {
            self.on_reject
        };

        let Some(handler) = handler else {
            if resolved {
                derived.resolve_values(values);
            } else {
                derived.reject_values(values);
            }
            return;
        };

        let location = derived.location();
        match panic::catch_unwind(AssertUnwindSafe(move || handler(values))) {
            Ok(Ok(values)) => derived.resolve_values(values),
            Ok(Err(failure)) => derived.reject_values(smallvec![Error::normalize(failure, location)]),
            Err(payload) => {
                let err = Error::from_panic(payload.as_ref(), location);
                derived.reject_values(smallvec![err.into()]);
            }
        }
    }
}
