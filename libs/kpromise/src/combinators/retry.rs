// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::panic::Location;
use core::time::Duration;

use super::CancelOnDrop;
use crate::error::{Error, ErrorKind};
use crate::promise::{Promise, Status};
use crate::value::{IntoOutcome, IntoValues, Value};

impl Promise {
    /// Calls `callback` until the promise it returns resolves, at most `times` times in total.
    ///
    /// Resolves with the first resolution. If every attempt rejects, rejects with the values of
    /// the last rejection. A `times` of zero still makes one attempt. Arguments for the
    /// callback are captured by the closure.
    #[track_caller]
    pub fn retry<F, R>(callback: F, times: usize) -> Promise
    where
        F: FnMut() -> R + 'static,
        R: IntoOutcome,
    {
        attempt_until_resolved(callback, times, None)
    }

    /// Like [`Promise::retry`], but waits `delay` on the executor's timer between attempts.
    #[track_caller]
    pub fn retry_with_delay<F, R>(callback: F, times: usize, delay: Duration) -> Promise
    where
        F: FnMut() -> R + 'static,
        R: IntoOutcome,
    {
        attempt_until_resolved(callback, times, Some(delay))
    }
}

#[track_caller]
fn attempt_until_resolved<F, R>(mut callback: F, times: usize, delay: Option<Duration>) -> Promise
where
    F: FnMut() -> R + 'static,
    R: IntoOutcome,
{
    let location = Location::caller();
    let times = times.max(1);

    Promise::new(move |resolver| async move {
        let mut in_flight = CancelOnDrop::default();

        for attempt in 1..=times {
            let promise = Promise::from_fn(&mut callback);
            in_flight.push(promise.clone());

            let (status, values) = promise.wait_status().await;
            let failure = match status {
                Status::Resolved => {
                    resolver.resolve(values);
                    return Ok(());
                }
                Status::Rejected => values,
                _ => Error::at(ErrorKind::AlreadyCancelled, location)
                    .with_message(format!("attempt {attempt} was cancelled"))
                    .into_values(),
            };

            if attempt == times {
                resolver.reject(failure);
                return Ok(());
            }

            tracing::trace!(attempt, times, "attempt failed, retrying");
            if let Some(delay) = delay {
                let wait = Promise::delay(delay);
                in_flight.push(wait.clone());
                wait.wait().await;
            }
        }

        Ok::<_, Value>(())
    })
}
