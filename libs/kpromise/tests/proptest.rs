// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod common;

use core::time::Duration;

use common::Host;
use kpromise::{Promise, Resolver, Status, Value, Values};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Resolve(i64),
    Reject(i64),
    Cancel,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i64>().prop_map(Op::Resolve),
        any::<i64>().prop_map(Op::Reject),
        Just(Op::Cancel),
    ]
}

/// Distinct delays in milliseconds, in arbitrary order.
fn distinct_delays(max_len: usize) -> impl Strategy<Value = Vec<u32>> {
    proptest::collection::hash_set(1_u32..500, 1..max_len)
        .prop_map(|delays| delays.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

fn delayed(ms: u32) -> Promise {
    Promise::delay(Duration::from_millis(u64::from(ms))).and_then_return(ms)
}

proptest! {
    #[test]
    fn the_first_settlement_is_final(ops in proptest::collection::vec(op(), 1..16)) {
        let host = Host::new();
        let _enter = host.exec.enter();

        let mut slot: Option<Resolver> = None;
        let promise = Promise::with_resolver(|resolver| {
            slot = Some(resolver.clone());
            Ok(())
        });
        let resolver = slot.unwrap();
        promise.catch(|_: Values| ());

        for op in &ops {
            match *op {
                Op::Resolve(v) => resolver.resolve(v),
                Op::Reject(v) => resolver.reject(v),
                Op::Cancel => promise.cancel(),
            }
            host.run();
        }

        match ops[0] {
            Op::Resolve(v) => {
                prop_assert_eq!(promise.status(), Status::Resolved);
                prop_assert_eq!(promise.values()[0].clone(), Value::Int(v));
            }
            Op::Reject(v) => {
                prop_assert_eq!(promise.status(), Status::Rejected);
                prop_assert_eq!(promise.values()[0].clone(), Value::Int(v));
            }
            Op::Cancel => {
                prop_assert_eq!(promise.status(), Status::Cancelled);
                prop_assert!(promise.values().is_empty());
            }
        }
    }

    #[test]
    fn all_keeps_input_order(delays in proptest::collection::vec(1_u32..200, 0..10)) {
        let host = Host::new();
        let _enter = host.exec.enter();

        let all = Promise::all(delays.iter().map(|&ms| delayed(ms)));
        host.advance_ms(200);

        let expected: Vec<Value> = delays.iter().map(|&ms| Value::from(ms)).collect();
        prop_assert_eq!(all.status(), Status::Resolved);
        prop_assert_eq!(all.values()[0].clone(), Value::list(expected));
        prop_assert_eq!(host.exec.pending_timers(), 0);
    }

    #[test]
    fn some_takes_the_earliest_in_resolution_order(
        (delays, count) in distinct_delays(10)
            .prop_flat_map(|delays| {
                let len = delays.len();
                (Just(delays), 1..=len)
            })
    ) {
        let host = Host::new();
        let _enter = host.exec.enter();

        let inputs: Vec<Promise> = delays.iter().map(|&ms| delayed(ms)).collect();
        let some = Promise::some(inputs.clone(), count);
        // one millisecond at a time, so every delay fires on its own tick
        for _ in 0..500 {
            host.advance_ms(1);
        }

        let mut sorted = delays.clone();
        sorted.sort_unstable();
        let expected: Vec<Value> = sorted[..count].iter().map(|&ms| Value::from(ms)).collect();
        prop_assert_eq!(some.status(), Status::Resolved);
        prop_assert_eq!(some.values()[0].clone(), Value::list(expected));

        // everything that was not needed got cancelled
        let cutoff = sorted[count - 1];
        for (input, &ms) in inputs.iter().zip(&delays) {
            if ms > cutoff {
                prop_assert_eq!(input.status(), Status::Cancelled);
            } else {
                prop_assert_eq!(input.status(), Status::Resolved);
            }
        }
    }
}
