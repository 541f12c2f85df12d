// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::panic::Location;
use core::time::Duration;

use crate::error::{Error, ErrorKind};
use crate::executor::Handle;
use crate::promise::Promise;

impl Promise {
    /// Returns a promise that resolves once `duration` has passed on the executor's clock.
    ///
    /// The promise resolves with the time that actually elapsed, which is at least `duration`
    /// and at least one timer tick. Cancelling the promise removes its timer entry.
    ///
    /// A `duration` longer than the executor's timer can track rejects with an
    /// [`ErrorKind::ExecutionError`].
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of an [`Executor`](crate::executor::Executor).
    #[track_caller]
    pub fn delay(duration: Duration) -> Promise {
        let location = Location::caller();
        let handle = Handle::current();

        Promise::with_resolver(move |resolver| {
            let start = handle.now().unwrap_or_default();

            let timer = handle.schedule_timer(duration, {
                let resolver = resolver.clone();
                let handle = handle.clone();
                move || {
                    let now = handle.now().unwrap_or_default();
                    resolver.resolve(now.saturating_sub(start));
                }
            });

            match timer {
                Ok(timer) => {
                    resolver.on_cancel(move || {
                        handle.cancel_timer(timer);
                    });
                    Ok(())
                }
                Err(err) => Err(Error::at(ErrorKind::ExecutionError, location)
                    .with_message(err.to_string())
                    .with_context(format!("Promise::delay called at {location}"))
                    .into()),
            }
        })
    }
}
