// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::pin::Pin;
use core::task::{Context, Poll};

/// Yields execution back to the executor.
///
/// The calling promise executor is resumed on the next [`Executor::tick`], giving every other
/// runnable task and deferred handler a chance to run first.
///
/// [`Executor::tick`]: crate::executor::Executor::tick
pub async fn yield_now() {
    YieldNow { yielded: false }.await;
}

#[must_use = "futures do nothing unless `.await`ed or polled"]
struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }

        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
