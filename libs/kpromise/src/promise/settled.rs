// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::pin::Pin;
use core::task::{Context, Poll, ready};

use super::{Promise, Status};
use crate::error::{Error, ErrorKind};
use crate::value::{Value, Values, first};

/// Future returned by [`Promise::wait_status`].
///
/// Awaiting a promise does not make the caller one of its consumers: it neither keeps the
/// promise alive against cancellation nor counts towards cancelling it.
#[derive(Debug)]
#[must_use = "futures do nothing unless `.await`ed or polled"]
pub struct Settled {
    promise: Promise,
}

/// Future returned by [`Promise::wait`].
#[derive(Debug)]
#[must_use = "futures do nothing unless `.await`ed or polled"]
pub struct Wait {
    inner: Settled,
}

/// Future returned by [`Promise::expect`] and by `.await`ing a [`Promise`] directly.
#[derive(Debug)]
#[must_use = "futures do nothing unless `.await`ed or polled"]
pub struct Expect {
    inner: Settled,
}

// === impl Settled ===

impl Settled {
    pub(super) fn new(promise: Promise) -> Self {
        promise.mark_observed();
        Self { promise }
    }
}

impl Future for Settled {
    type Output = (Status, Values);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.promise.poll_settled(cx)
    }
}

// === impl Wait ===

impl Wait {
    pub(super) fn new(promise: Promise) -> Self {
        Self {
            inner: Settled::new(promise),
        }
    }
}

impl Future for Wait {
    type Output = (bool, Values);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let (status, values) = ready!(Pin::new(&mut self.inner).poll(cx));
        Poll::Ready((status == Status::Resolved, values))
    }
}

// === impl Expect ===

impl Expect {
    pub(super) fn new(promise: Promise) -> Self {
        Self {
            inner: Settled::new(promise),
        }
    }
}

impl Future for Expect {
    type Output = Result<Values, Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let location = self.inner.promise.location();
        let (status, values) = ready!(Pin::new(&mut self.inner).poll(cx));

        Poll::Ready(match status {
            Status::Resolved => Ok(values),
            Status::Rejected => Err(first(&values)),
            Status::Cancelled => Err(Error::at(ErrorKind::AlreadyCancelled, location)
                .with_message("the awaited promise was cancelled")
                .into()),
            Status::Pending => unreachable!("a settled promise can't be pending"),
        })
    }
}

impl IntoFuture for Promise {
    type Output = Result<Values, Value>;
    type IntoFuture = Expect;

    fn into_future(self) -> Self::IntoFuture {
        Expect::new(self)
    }
}
