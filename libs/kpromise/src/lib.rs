// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Promises with first-class cancellation for cooperative, single-threaded hosts.
//!
//! A [`Promise`] represents a value that will exist later, or a failure. Promises are chained
//! with [`Promise::and_then`], [`Promise::catch`] and [`Promise::finally`], aggregated with the
//! combinators ([`Promise::all`], [`Promise::race`], [`Promise::each`], ...) and cancelled with
//! [`Promise::cancel`]. Cancellation is reference counted: a promise is only cancelled on behalf
//! of its consumers once *all* of them have been cancelled.
//!
//! All bookkeeping happens on an [`Executor`](executor::Executor) owned by the host. The host
//! drives it by calling [`Executor::tick`](executor::Executor::tick) once per time-step (or by
//! handing a future to [`Executor::block_on`](executor::Executor::block_on)); every effect of a
//! settlement runs on a later pass of the executor's job queue, never synchronously.
//!
//! ```
//! use core::time::Duration;
//! use kpromise::executor::Executor;
//! use kpromise::time::StdClock;
//! use kpromise::{Promise, Value, Values};
//!
//! let exec = Executor::new(StdClock::new());
//! let _enter = exec.enter();
//!
//! let answer = Promise::delay(Duration::from_millis(5))
//!     .and_then(|_: Values| 21)
//!     .and_then(|values: Values| values[0].as_int().unwrap_or_default() * 2);
//!
//! let values = exec.block_on(answer).unwrap();
//! assert_eq!(values[0], Value::Int(42));
//! ```

mod adapters;
mod combinators;
mod error;
pub mod executor;
mod hooks;
mod promise;
mod scheduler;
pub mod task;
#[cfg(test)]
mod test_util;
pub mod time;
mod value;

pub use adapters::{Connection, Event, Signal, promisify};
pub use error::{Error, ErrorKind};
pub use hooks::UnhandledRejectionHook;
pub use promise::{Expect, Id, Promise, Resolver, Settled, Status, Wait};
pub use scheduler::Tick;
pub use value::{IntoOutcome, IntoValues, Value, Values};
