// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use kpromise::executor::Executor;
use kpromise::time::ManualClock;
use kpromise::{Promise, Value, Values};

fn chain_10k(c: &mut Criterion) {
    let exec = Executor::new(ManualClock::new());

    const LINKS: usize = 10_000;

    c.bench_function("chain_10k", |b| {
        b.iter(|| {
            let values = exec
                .block_on(async {
                    let mut promise = Promise::resolve(0);
                    for _ in 0..LINKS {
                        promise = promise.and_then(|values: Values| {
                            values[0].as_int().unwrap_or_default() + 1
                        });
                    }
                    promise.await
                })
                .unwrap();
            assert_eq!(values[0], Value::from(LINKS));
        });
    });
}

fn all_1k_delays(c: &mut Criterion) {
    let exec = Executor::new(ManualClock::new());

    const DELAYS: u64 = 1_000;

    c.bench_function("all_1k_delays", |b| {
        b.iter(|| {
            exec.block_on(async {
                Promise::all((0..DELAYS).map(|ms| Promise::delay(Duration::from_millis(ms))))
                    .await
            })
            .unwrap();
        });
    });
}

fn cancel_fan_out_1k(c: &mut Criterion) {
    let exec = Executor::new(ManualClock::new());
    let _enter = exec.enter();

    const CONSUMERS: usize = 1_000;

    c.bench_function("cancel_fan_out_1k", |b| {
        b.iter(|| {
            let root = Promise::with_resolver(|_| Ok(()));
            let leaves: Vec<_> = (0..CONSUMERS)
                .map(|_| root.and_then(|values: Values| values))
                .collect();
            root.cancel();
            exec.tick();
            drop(leaves);
        });
    });
}

criterion_group!(benches, chain_10k, all_1k_delays, cancel_fan_out_1k);
criterion_main!(benches);
