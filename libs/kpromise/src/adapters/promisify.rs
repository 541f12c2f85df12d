// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::panic::Location;

use crate::promise::Promise;
use crate::value::IntoOutcome;

/// Wraps a suspending function into one that returns a [`Promise`].
///
/// Every call of the returned function runs `f(args)` as a promise executor. The promise
/// resolves with what the future returns; an `Err` or a panic rejects it, with anything but an
/// [`Error`](crate::Error) wrapped in an [`ErrorKind::ExecutionError`](crate::ErrorKind).
/// Functions taking several arguments take them as a tuple.
///
/// The returned function panics if it is called outside the context of an
/// [`Executor`](crate::executor::Executor).
#[track_caller]
pub fn promisify<A, F, Fut, R>(f: F) -> impl Fn(A) -> Promise
where
    F: Fn(A) -> Fut + 'static,
    Fut: Future<Output = R> + 'static,
    R: IntoOutcome,
{
    let location = Location::caller();
    move |args| Promise::spawn_at(location, f(args))
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::test_util::Harness;
    use crate::value::{Value, Values};
    use crate::{Error, ErrorKind, Status};

    #[test]
    fn resolves_with_the_return_value() {
        let h = Harness::new();
        let add = promisify(|(a, b): (i64, i64)| async move {
            Promise::delay(Duration::from_millis(1)).wait().await;
            a + b
        });

        let sum = add((2, 3));
        assert_eq!(sum.status(), Status::Pending);

        h.advance(Duration::from_millis(1));
        assert_eq!(sum.status(), Status::Resolved);
        assert_eq!(sum.values()[0], Value::Int(5));
    }

    #[test]
    fn failures_become_execution_errors() {
        let h = Harness::new();
        let fails = promisify(|reason: &'static str| async move { Err::<(), _>(reason) });

        let promise = fails("broken");
        let caught = promise.catch(|values: Values| values);

        h.run();
        assert_eq!(promise.status(), Status::Rejected);
        let err = caught.values()[0].clone();
        assert!(Error::is_kind(&err, &ErrorKind::ExecutionError));
        assert_eq!(err.as_error().and_then(Error::message), Some("broken"));
    }

    #[test]
    fn structured_errors_pass_through() {
        let h = Harness::new();
        let fails = promisify(|()| async { Err::<(), _>(Error::new(ErrorKind::custom("io"))) });

        let promise = fails(());
        let caught = promise.catch(|values: Values| values);

        h.run();
        assert!(Error::is_kind(&caught.values()[0], &ErrorKind::custom("io")));
    }
}
