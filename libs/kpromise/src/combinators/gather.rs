// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::{Cell, RefCell};
use core::panic::Location;
use std::rc::Rc;

use super::Group;
use crate::error::{Error, ErrorKind};
use crate::promise::{Promise, Resolver, Status};
use crate::value::{Value, Values, first};

/// Shared state of an [`Promise::all`] or [`Promise::some`] call.
struct Gather {
    group: Group,
    order: Order,
    needed: usize,
    total: usize,
    results: RefCell<Vec<Value>>,
    resolved: Cell<usize>,
    rejected: Cell<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Order {
    /// Results are stored at their input's index.
    Input,
    /// Results are stored in the order they arrive.
    Resolution,
}

impl Promise {
    /// Resolves with a [`Value::List`] holding the first value of every input, in input order,
    /// once all of them resolved.
    ///
    /// Rejects with the first rejection, cancelling every other input that isn't consumed
    /// elsewhere. An empty input resolves right away with an empty list.
    #[track_caller]
    pub fn all(promises: impl IntoIterator<Item = Promise>) -> Promise {
        let promises: Vec<Promise> = promises.into_iter().collect();
        let needed = promises.len();
        gather(promises, needed, Order::Input)
    }

    /// Resolves as soon as `count` inputs resolved, with a [`Value::List`] of their first values
    /// in the order they resolved. The remaining inputs are then cancelled unless consumed
    /// elsewhere.
    ///
    /// A `count` of zero resolves right away with an empty list. Rejects, with the values of the
    /// deciding rejection, once too many inputs rejected for `count` to still be reached; a
    /// `count` larger than the number of inputs rejects right away.
    #[track_caller]
    pub fn some(promises: impl IntoIterator<Item = Promise>, count: usize) -> Promise {
        gather(promises.into_iter().collect(), count, Order::Resolution)
    }

    /// Resolves with the first value of the first input to resolve. Rejects only once every
    /// input rejected, with the values of the last rejection.
    #[track_caller]
    pub fn any(promises: impl IntoIterator<Item = Promise>) -> Promise {
        gather(promises.into_iter().collect(), 1, Order::Resolution).and_then(|values: Values| {
            first(&values)
                .as_list()
                .and_then(|list| list.first().cloned())
                .unwrap_or_default()
        })
    }

    /// Resolves with a [`Value::List`] holding the [`Status`] of every input, in input order,
    /// once all of them settled. Never rejects.
    #[track_caller]
    pub fn all_settled(promises: impl IntoIterator<Item = Promise>) -> Promise {
        let promises: Vec<Promise> = promises.into_iter().collect();
        if promises.is_empty() {
            return Promise::resolve(Value::list([]));
        }

        let group = Rc::new(Group::default());
        let statuses = Rc::new(RefCell::new(vec![Value::Nil; promises.len()]));
        let remaining = Rc::new(Cell::new(promises.len()));

        Promise::with_resolver(|resolver| {
            for (index, promise) in promises.iter().enumerate() {
                let watcher = promise.finally({
                    let resolver = resolver.clone();
                    let statuses = statuses.clone();
                    let remaining = remaining.clone();
                    move |status: Status| {
                        statuses.borrow_mut()[index] = Value::Status(status);
                        remaining.set(remaining.get() - 1);
                        if remaining.get() == 0 {
                            let statuses = statuses.take();
                            resolver.resolve(Value::list(statuses));
                        }
                    }
                });
                // the watcher mirrors its input, rejections included
                watcher.catch(|_: Values| ());
                group.push(watcher);
            }

            resolver.on_cancel(move || group.cancel_all());
            Ok(())
        })
    }
}

#[track_caller]
fn gather(promises: Vec<Promise>, needed: usize, order: Order) -> Promise {
    let total = promises.len();
    if needed > total {
        let err = Error::new(ErrorKind::ExecutionError)
            .with_message(format!("cannot resolve {needed} of {total} promises"))
            .with_context(format!("called at {}", Location::caller()));
        return Promise::reject(err);
    }
    if needed == 0 {
        return Promise::resolve(Value::list([]));
    }

    let gather = Rc::new(Gather {
        group: Group::default(),
        order,
        needed,
        total,
        results: RefCell::new(match order {
            Order::Input => vec![Value::Nil; total],
            Order::Resolution => Vec::with_capacity(needed),
        }),
        resolved: Cell::new(0),
        rejected: Cell::new(0),
    });

    Promise::with_resolver(|resolver| {
        for (index, promise) in promises.iter().enumerate() {
            let link = promise.then(
                {
                    let gather = gather.clone();
                    let resolver = resolver.clone();
                    move |values: Values| gather.resolved(index, first(&values), &resolver)
                },
                {
                    let gather = gather.clone();
                    let resolver = resolver.clone();
                    move |values: Values| gather.rejected(values, &resolver)
                },
            );
            gather.group.push(link);
        }

        resolver.on_cancel(move || gather.group.cancel_all());
        Ok(())
    })
}

impl Gather {
    fn resolved(&self, index: usize, value: Value, resolver: &Resolver) {
        let resolved = self.resolved.get() + 1;
        self.resolved.set(resolved);

        {
            let mut results = self.results.borrow_mut();
            match self.order {
                Order::Input => results[index] = value,
                Order::Resolution => results.push(value),
            }
        }

        if resolved == self.needed {
            tracing::trace!(resolved, total = self.total, "gather satisfied");
            let results = self.results.take();
            resolver.resolve(Value::list(results));
            self.group.cancel_all();
        }
    }

    fn rejected(&self, values: Values, resolver: &Resolver) {
        let rejected = self.rejected.get() + 1;
        self.rejected.set(rejected);

        if self.total - rejected < self.needed {
            tracing::trace!(rejected, total = self.total, "gather can no longer be satisfied");
            resolver.reject(values);
            self.group.cancel_all();
        }
    }
}
