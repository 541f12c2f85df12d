// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::time::Duration;

use tracing::dispatcher::DefaultGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

use crate::executor::{EnterGuard, Executor};
use crate::time::ManualClock;

/// An entered executor running on a [`ManualClock`], with tracing set up.
pub(crate) struct Harness {
    // drop order matters: leave the executor before dropping it
    _enter: EnterGuard<'static>,
    pub(crate) exec: &'static Executor,
    pub(crate) clock: ManualClock,
    _trace: DefaultGuard,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let _trace = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .set_default();

        let clock = ManualClock::new();
        let exec: &'static Executor = Box::leak(Box::new(
            Executor::builder()
                .name("test")
                .warn_on_unhandled_rejection(false)
                .build(clock.clone()),
        ));

        Self {
            _enter: exec.enter(),
            exec,
            clock,
            _trace,
        }
    }

    /// Ticks until no work is left that could run without time passing.
    pub(crate) fn run(&self) {
        while self.exec.tick().did_work() || self.exec.has_pending_work() {}
    }

    /// Moves the clock forward and runs everything that became due.
    pub(crate) fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.run();
    }
}
