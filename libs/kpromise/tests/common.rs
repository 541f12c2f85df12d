// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![allow(dead_code, reason = "not every test file uses every helper")]

use core::time::Duration;

use kpromise::executor::Executor;
use kpromise::time::ManualClock;
use tracing::dispatcher::DefaultGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// A host driving an executor on a manual clock, the way an embedding application would.
pub struct Host {
    pub exec: Executor,
    pub clock: ManualClock,
    _trace: DefaultGuard,
}

impl Host {
    pub fn new() -> Self {
        let _trace = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .set_default();

        let clock = ManualClock::new();
        let exec = Executor::builder()
            .name("host")
            .warn_on_unhandled_rejection(false)
            .build(clock.clone());

        Self {
            exec,
            clock,
            _trace,
        }
    }

    /// Ticks until nothing is left that could run without time passing.
    pub fn run(&self) {
        while self.exec.tick().did_work() || self.exec.has_pending_work() {}
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.run();
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}
