// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::panic::Location;

use super::CancelOnDrop;
use crate::error::{Error, ErrorKind};
use crate::promise::{Promise, Status};
use crate::value::{IntoOutcome, Value, Values, first};

impl Promise {
    /// Calls `predicate(value, index)` for every item in turn, with 1-based indices, and
    /// resolves with a [`Value::List`] of the first value each call produced.
    ///
    /// Items that are promises are waited for first. Reaching one that rejected rejects with
    /// its values without calling `predicate`; reaching a cancelled one rejects with an
    /// [`ErrorKind::AlreadyCancelled`] error. A promise returned by `predicate` is waited for
    /// before moving on, and its rejection ends the traversal.
    ///
    /// Once the traversal ends early, or the returned promise is cancelled, the pending
    /// `predicate` promise and every input not reached yet are cancelled unless consumed
    /// elsewhere.
    #[track_caller]
    pub fn each<I, F, R>(items: I, mut predicate: F) -> Promise
    where
        I: IntoIterator,
        I::Item: Into<Value>,
        F: FnMut(Value, usize) -> R + 'static,
        R: IntoOutcome,
    {
        let location = Location::caller();
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();

        Promise::new(move |resolver| async move {
            let mut dependencies = CancelOnDrop::default();
            // consume every input up front so unreached ones can be cancelled along with us
            for item in &items {
                if let Value::Promise(promise) = item {
                    dependencies.push(promise.then(|values: Values| values, |_: Values| ()));
                }
            }

            let mut results = Vec::with_capacity(items.len());
            for (index, item) in (1..).zip(items) {
                let value = match item {
                    Value::Promise(promise) => match promise.wait_status().await {
                        (Status::Resolved, values) => first(&values),
                        (Status::Rejected, values) => {
                            resolver.reject(values);
                            return Ok(());
                        }
                        _ => return Err(Value::from(already_cancelled(location, index, "each"))),
                    },
                    value => value,
                };

                let returned = Promise::resolve(predicate(value, index).into_outcome()?);
                dependencies.push(returned.clone());

                match returned.wait_status().await {
                    (Status::Resolved, values) => results.push(first(&values)),
                    (Status::Rejected, values) => {
                        resolver.reject(values);
                        return Ok(());
                    }
                    _ => return Err(Value::from(already_cancelled(location, index, "each"))),
                }
            }

            resolver.resolve(Value::list(results));
            Ok::<_, Value>(())
        })
    }

    /// Left-folds `items` into a single value.
    ///
    /// Every item is resolved first (items that are promises are waited for), then
    /// `reducer(accumulator, value, index)` produces the next accumulator, with 1-based
    /// indices. The reducer may return a promise, which is waited for. The fold stops at the
    /// first rejection and rejects with it; reaching a cancelled input rejects with an
    /// [`ErrorKind::AlreadyCancelled`] error.
    ///
    /// Like [`Promise::each`], inputs are consumed up front: once the fold ends early or is
    /// cancelled, every input not reached yet is cancelled unless consumed elsewhere.
    #[track_caller]
    pub fn fold<I, F, R>(items: I, mut reducer: F, initial: impl Into<Value>) -> Promise
    where
        I: IntoIterator,
        I::Item: Into<Value>,
        F: FnMut(Value, Value, usize) -> R + 'static,
        R: IntoOutcome,
    {
        let location = Location::caller();
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        let initial: Value = initial.into();

        Promise::new(move |resolver| async move {
            let mut dependencies = CancelOnDrop::default();
            for item in &items {
                if let Value::Promise(promise) = item {
                    dependencies.push(promise.then(|values: Values| values, |_: Values| ()));
                }
            }

            let mut accumulator = initial;
            for (index, item) in (1..).zip(items) {
                let value = match item {
                    Value::Promise(promise) => match promise.wait_status().await {
                        (Status::Resolved, values) => first(&values),
                        (Status::Rejected, values) => {
                            resolver.reject(values);
                            return Ok(());
                        }
                        _ => return Err(Value::from(already_cancelled(location, index, "fold"))),
                    },
                    value => value,
                };

                let returned =
                    Promise::resolve(reducer(accumulator, value, index).into_outcome()?);
                dependencies.push(returned.clone());

                accumulator = match returned.wait_status().await {
                    (Status::Resolved, values) => first(&values),
                    (Status::Rejected, values) => {
                        resolver.reject(values);
                        return Ok(());
                    }
                    _ => return Err(Value::from(already_cancelled(location, index, "fold"))),
                };
            }

            resolver.resolve(accumulator);
            Ok::<_, Value>(())
        })
    }
}

fn already_cancelled(location: &'static Location<'static>, index: usize, name: &str) -> Error {
    Error::at(ErrorKind::AlreadyCancelled, location)
        .with_message(format!("the promise at index {index} was cancelled"))
        .with_context(format!("{name}() called at {location}"))
}
