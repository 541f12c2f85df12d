// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::rc::Rc;

use super::Group;
use crate::promise::Promise;
use crate::value::Values;

impl Promise {
    /// Settles like the first input to settle, whichever way it went.
    ///
    /// The losing inputs are cancelled unless they are consumed elsewhere. Racing no promises
    /// at all never settles.
    #[track_caller]
    pub fn race(promises: impl IntoIterator<Item = Promise>) -> Promise {
        let promises: Vec<Promise> = promises.into_iter().collect();
        let group = Rc::new(Group::default());

        Promise::with_resolver(|resolver| {
            for promise in &promises {
                let link = promise.then(
                    {
                        let group = group.clone();
                        let resolver = resolver.clone();
                        move |values: Values| {
                            resolver.resolve(values);
                            group.cancel_all();
                        }
                    },
                    {
                        let group = group.clone();
                        let resolver = resolver.clone();
                        move |values: Values| {
                            resolver.reject(values);
                            group.cancel_all();
                        }
                    },
                );
                group.push(link);
            }

            resolver.on_cancel(move || group.cancel_all());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::Status;
    use crate::test_util::Harness;
    use crate::value::Value;

    #[test]
    fn first_delay_wins() {
        let h = Harness::new();
        let slow = Promise::delay(Duration::from_millis(5));
        let race = Promise::race([Promise::delay(Duration::from_millis(1)), slow.clone()]);
        assert_eq!(h.exec.pending_timers(), 2);

        h.advance(Duration::from_millis(1));
        assert_eq!(race.status(), Status::Resolved);
        assert_eq!(race.values()[0], Value::Duration(Duration::from_millis(1)));
        assert_eq!(slow.status(), Status::Cancelled);
        assert_eq!(h.exec.pending_timers(), 0);
    }

    #[test]
    fn first_rejection_wins_too() {
        let h = Harness::new();
        let race = Promise::race([
            Promise::delay(Duration::from_millis(1)).and_then_return("late"),
            Promise::reject("early"),
        ]);
        race.catch(|_: Values| ());

        h.run();
        assert_eq!(race.status(), Status::Rejected);
        assert_eq!(race.values()[0], Value::from("early"));
        assert_eq!(h.exec.pending_timers(), 0);
    }

    #[test]
    fn racing_nothing_stays_pending() {
        let h = Harness::new();
        let race = Promise::race(Vec::new());
        h.advance(Duration::from_secs(1));
        assert_eq!(race.status(), Status::Pending);
    }

    #[test]
    fn cancelling_the_race_cancels_every_input() {
        let h = Harness::new();
        let (a, b) = (
            Promise::delay(Duration::from_millis(1)),
            Promise::delay(Duration::from_millis(2)),
        );
        let race = Promise::race([a.clone(), b.clone()]);

        race.cancel();
        h.run();
        assert_eq!(a.status(), Status::Cancelled);
        assert_eq!(b.status(), Status::Cancelled);
        assert_eq!(h.exec.pending_timers(), 0);
    }
}
