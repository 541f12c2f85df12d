// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Aggregating many promises into one.
//!
//! Every combinator here is built from the public chaining API only. To stop depending on an
//! input a combinator cancels the promise it chained onto that input, never the input itself,
//! so inputs that are consumed elsewhere keep running.

mod gather;
mod race;
mod retry;
mod sequence;

use core::cell::RefCell;
use core::mem;

use crate::promise::Promise;

/// The promises a combinator chained onto its inputs, cancelled together once the combinator
/// is done with them.
#[derive(Default)]
struct Group {
    promises: RefCell<Vec<Promise>>,
}

/// Like [`Group`], but owned by a single executor future and cancelled when it is dropped,
/// which is also what happens when that future is abandoned.
#[derive(Default)]
struct CancelOnDrop {
    promises: Vec<Promise>,
}

impl Group {
    fn push(&self, promise: Promise) {
        self.promises.borrow_mut().push(promise);
    }

    fn cancel_all(&self) {
        let promises = self.promises.take();
        for promise in promises {
            promise.cancel();
        }
    }
}

impl CancelOnDrop {
    fn push(&mut self, promise: Promise) {
        self.promises.push(promise);
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        for promise in mem::take(&mut self.promises) {
            promise.cancel();
        }
    }
}
