// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::panic::Location;
use core::time::Duration;

use crate::error::{Error, ErrorKind};
use crate::promise::Promise;
use crate::value::{Value, Values};

impl Promise {
    /// Requires this promise to settle before `duration` has elapsed.
    ///
    /// The returned promise settles like this promise if it settles in time. Otherwise it
    /// rejects with `rejection`, or an [`ErrorKind::TimedOut`] error if none was given, and
    /// this promise is cancelled unless something else still consumes it.
    #[track_caller]
    pub fn timeout(&self, duration: Duration, rejection: Option<Value>) -> Promise {
        let location = Location::caller();
        let rejection = rejection.unwrap_or_else(|| {
            Error::at(ErrorKind::TimedOut, location)
                .with_message(format!("timed out after {duration:?}"))
                .with_context(format!("timeout() called at {location}"))
                .into()
        });

        let timer = Promise::with_resolver(move |resolver| {
            let elapsed = Promise::delay(duration).and_then({
                let resolver = resolver.clone();
                move |_: Values| resolver.reject(rejection)
            });
            resolver.on_cancel(move || elapsed.cancel());
            Ok(())
        });

        Promise::race([timer, self.clone()])
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::Status;
    use crate::test_util::Harness;

    #[test]
    fn never_settling_promise_times_out() {
        let h = Harness::new();
        let cancelled = Rc::new(Cell::new(false));

        let never = Promise::with_resolver({
            let cancelled = cancelled.clone();
            move |resolver| {
                resolver.on_cancel(move || cancelled.set(true));
                Ok(())
            }
        });
        let timed = never.timeout(Duration::from_millis(10), None);
        let caught = timed.catch(|values: Values| values);

        h.advance(Duration::from_millis(9));
        assert_eq!(timed.status(), Status::Pending);

        h.advance(Duration::from_millis(1));
        assert_eq!(timed.status(), Status::Rejected);
        assert!(Error::is_kind(&caught.values()[0], &ErrorKind::TimedOut));
        assert_eq!(never.status(), Status::Cancelled);
        assert!(cancelled.get());
    }

    #[test]
    fn consumed_promise_survives_timeout() {
        let h = Harness::new();
        let never = Promise::with_resolver(|_| Ok(()));
        let other = never.and_then(|values: Values| values);

        let timed = never.timeout(Duration::from_millis(5), Some(Value::from("late")));
        timed.catch(|_: Values| ());

        h.advance(Duration::from_millis(5));
        assert_eq!(timed.status(), Status::Rejected);
        assert_eq!(timed.values()[0], Value::from("late"));
        assert_eq!(never.status(), Status::Pending);
        assert_eq!(other.status(), Status::Pending);
    }

    #[test]
    fn settling_in_time_removes_timer() {
        let h = Harness::new();
        let quick = Promise::delay(Duration::from_millis(2)).and_then(|_: Values| 5);
        let timed = quick.timeout(Duration::from_millis(50), None);
        assert_eq!(h.exec.pending_timers(), 2);

        h.advance(Duration::from_millis(2));
        assert_eq!(timed.status(), Status::Resolved);
        assert_eq!(timed.values()[0], Value::Int(5));
        assert_eq!(h.exec.pending_timers(), 0);
    }
}
