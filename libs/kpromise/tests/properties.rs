// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod common;

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::rc::Rc;

use common::Host;
use kpromise::{Error, ErrorKind, Promise, Resolver, Status, Value, Values};

fn never() -> Promise {
    Promise::with_resolver(|_| Ok(()))
}

fn manual() -> (Promise, Resolver) {
    let mut slot = None;
    let promise = Promise::with_resolver(|resolver| {
        slot = Some(resolver.clone());
        Ok(())
    });
    (promise, slot.unwrap())
}

#[test]
fn only_the_first_resolution_counts() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let promise = Promise::with_resolver(|resolver| {
        resolver.resolve("first");
        resolver.resolve("second");
        resolver.reject("third");
        Ok(())
    });
    host.run();

    assert_eq!(promise.status(), Status::Resolved);
    assert_eq!(promise.values().as_slice(), [Value::from("first")]);
}

#[test]
fn handlers_never_run_synchronously() {
    let host = Host::new();
    let _enter = host.exec.enter();
    let ran = Rc::new(Cell::new(false));

    let (promise, resolver) = manual();
    promise.and_then({
        let ran = ran.clone();
        move |_: Values| ran.set(true)
    });

    resolver.resolve(1);
    assert_eq!(promise.status(), Status::Resolved);
    assert!(!ran.get());

    host.run();
    assert!(ran.get());

    // registering on an already resolved promise defers as well
    let late = Rc::new(Cell::new(false));
    promise.and_then({
        let late = late.clone();
        move |_: Values| late.set(true)
    });
    assert!(!late.get());
    host.run();
    assert!(late.get());
}

#[test]
fn handlers_run_in_registration_order() {
    let host = Host::new();
    let _enter = host.exec.enter();
    let order = Rc::new(RefCell::new(Vec::new()));

    let (promise, resolver) = manual();
    for i in 0..3 {
        let order = order.clone();
        promise.finally(move |_| order.borrow_mut().push(format!("finally {i}")));
    }
    for i in 0..3 {
        let order = order.clone();
        promise.and_then(move |_: Values| order.borrow_mut().push(format!("then {i}")));
    }

    resolver.resolve(());
    host.run();
    assert_eq!(
        *order.borrow(),
        ["then 0", "then 1", "then 2", "finally 0", "finally 1", "finally 2"]
    );
}

#[test]
fn cancellation_is_reference_counted() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let parent = never();
    let first = parent.and_then(|values: Values| values);
    let second = parent.and_then(|values: Values| values);

    first.cancel();
    host.run();
    assert_eq!(parent.status(), Status::Pending);
    assert_eq!(second.status(), Status::Pending);

    second.cancel();
    host.run();
    assert_eq!(parent.status(), Status::Cancelled);
}

#[test]
fn cancellation_flows_down_to_every_descendant() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let root = never();
    let child = root.and_then(|values: Values| values);
    let grandchild = child.catch(|values: Values| values);

    root.cancel();
    assert_eq!(child.status(), Status::Cancelled);
    assert_eq!(grandchild.status(), Status::Cancelled);

    // chaining onto a cancelled promise yields a cancelled promise
    let ran = Rc::new(Cell::new(false));
    let late = root.and_then({
        let ran = ran.clone();
        move |_: Values| ran.set(true)
    });
    host.run();
    assert_eq!(late.status(), Status::Cancelled);
    assert!(!ran.get());
}

#[test]
fn finally_does_not_keep_its_parent_alive() {
    let host = Host::new();
    let _enter = host.exec.enter();
    let seen = Rc::new(Cell::new(None));

    let parent = never();
    let consumer = parent.and_then(|values: Values| values);
    let finally = parent.finally({
        let seen = seen.clone();
        move |status| seen.set(Some(status))
    });

    consumer.cancel();
    host.run();
    assert_eq!(parent.status(), Status::Cancelled);
    assert_eq!(seen.get(), Some(Status::Cancelled));
    assert_eq!(finally.status(), Status::Cancelled);
}

#[test]
fn cancel_hook_runs_once_and_abandons_the_executor() {
    let host = Host::new();
    let _enter = host.exec.enter();
    let hooks = Rc::new(Cell::new(0));
    let finished = Rc::new(Cell::new(false));

    let promise = Promise::new({
        let hooks = hooks.clone();
        let finished = finished.clone();
        move |resolver| async move {
            resolver.on_cancel(move || hooks.set(hooks.get() + 1));
            Promise::delay(Duration::from_millis(10)).wait().await;
            finished.set(true);
            resolver.resolve(());
            Ok::<_, Value>(())
        }
    });
    assert_eq!(host.exec.live_tasks(), 1);

    promise.cancel();
    promise.cancel();
    host.advance_ms(20);

    assert_eq!(hooks.get(), 1);
    assert!(!finished.get());
    assert_eq!(host.exec.live_tasks(), 0);
}

#[test]
fn handler_failures_become_rejections() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let failed = Promise::resolve(1).and_then(|_: Values| -> Result<(), Value> { Err("nope".into()) });
    let panicked = Promise::resolve(1).and_then(|_: Values| -> i64 { panic!("kaboom") });
    let structured = Promise::resolve(1)
        .and_then(|_: Values| Err::<(), _>(Error::new(ErrorKind::custom("mine"))));
    for promise in [&failed, &panicked, &structured] {
        promise.catch(|_: Values| ());
    }
    host.run();

    let failed = failed.values()[0].clone();
    assert!(Error::is_kind(&failed, &ErrorKind::ExecutionError));
    assert_eq!(failed.as_error().and_then(Error::message), Some("nope"));

    let panicked = panicked.values()[0].clone();
    assert!(Error::is_kind(&panicked, &ErrorKind::ExecutionError));

    assert!(Error::is_kind(&structured.values()[0], &ErrorKind::custom("mine")));
}

#[test]
fn explicit_rejections_pass_through_unchanged() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let rejected = Promise::reject(("raw", 2));
    let passed = rejected.and_then(|values: Values| values);
    passed.catch(|_: Values| ());
    host.run();

    assert_eq!(passed.status(), Status::Rejected);
    assert_eq!(passed.values().as_slice(), [Value::from("raw"), Value::Int(2)]);
}

#[test]
fn all_rejects_with_the_failure_and_cancels_the_rest() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let empty = Promise::all(Vec::new());
    assert_eq!(empty.status(), Status::Resolved);
    assert_eq!(empty.values()[0], Value::list([]));

    let pending = never();
    let all = Promise::all([pending.clone(), Promise::reject("boom")]);
    all.catch(|_: Values| ());
    host.run();

    assert_eq!(all.values()[0], Value::from("boom"));
    assert_eq!(pending.status(), Status::Cancelled);
}

#[test]
fn some_orders_by_resolution_and_cancels_the_rest() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let slowest = Promise::delay(Duration::from_millis(30)).and_then_return("c");
    let some = Promise::some(
        [
            Promise::delay(Duration::from_millis(20)).and_then_return("a"),
            Promise::delay(Duration::from_millis(10)).and_then_return("b"),
            slowest.clone(),
        ],
        2,
    );

    host.advance_ms(20);
    assert_eq!(
        some.values()[0],
        Value::list([Value::from("b"), Value::from("a")])
    );
    assert_eq!(slowest.status(), Status::Cancelled);
    assert_eq!(host.exec.pending_timers(), 0);
}

#[test]
fn race_settles_with_the_first_delay() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let race = Promise::race([
        Promise::delay(Duration::from_millis(1)),
        Promise::delay(Duration::from_millis(5)),
    ]);
    assert_eq!(host.exec.pending_timers(), 2);

    host.advance_ms(1);
    assert_eq!(race.status(), Status::Resolved);
    assert_eq!(race.values()[0], Value::Duration(Duration::from_millis(1)));
    assert_eq!(host.exec.pending_timers(), 0);
}

#[test]
fn each_stops_at_the_first_failing_predicate() {
    let host = Host::new();
    let _enter = host.exec.enter();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let each = Promise::each(["a", "b", "c"], {
        let seen = seen.clone();
        move |value: Value, index| {
            seen.borrow_mut().push(value.to_string());
            if index == 2 {
                Promise::reject(value)
            } else {
                Promise::resolve(value)
            }
        }
    });
    each.catch(|_: Values| ());
    host.run();

    assert_eq!(each.status(), Status::Rejected);
    assert_eq!(each.values()[0], Value::from("b"));
    assert_eq!(*seen.borrow(), ["a", "b"]);
}

#[test]
fn retry_reports_the_last_failure() {
    let host = Host::new();
    let _enter = host.exec.enter();
    let calls = Rc::new(Cell::new(0_i64));

    let retried = Promise::retry(
        {
            let calls = calls.clone();
            move || {
                calls.set(calls.get() + 1);
                Promise::reject(calls.get())
            }
        },
        3,
    );
    retried.catch(|_: Values| ());
    host.run();

    assert_eq!(retried.values()[0], Value::Int(3));
    assert_eq!(calls.get(), 3);
}

#[test]
fn timeout_cancels_an_unconsumed_promise() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let slow = never();
    let timed = slow.timeout(Duration::from_millis(10), None);
    timed.catch(|_: Values| ());

    host.advance_ms(10);
    assert!(Error::is_kind(&timed.values()[0], &ErrorKind::TimedOut));
    assert_eq!(slow.status(), Status::Cancelled);
}

#[test]
fn now_only_accepts_resolved_promises() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let resolved = Promise::resolve(1).now(None);
    let pending = never().now(None);
    let custom = never().now(Some(Value::from("not yet")));
    for promise in [&pending, &custom] {
        promise.catch(|_: Values| ());
    }
    host.run();

    assert_eq!(resolved.values()[0], Value::Int(1));
    assert!(Error::is_kind(&pending.values()[0], &ErrorKind::NotResolvedInTime));
    assert_eq!(custom.values()[0], Value::from("not yet"));
}

#[test]
fn adopting_a_promise_follows_it() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let inner = Promise::delay(Duration::from_millis(5)).and_then_return(9);
    let outer = Promise::resolve(inner.clone());
    assert!(Promise::is(&Value::from(inner.clone())));
    assert!(!Promise::is(&Value::from(9)));

    host.advance_ms(5);
    assert_eq!(outer.values()[0], Value::Int(9));

    // cancelling the adopter cancels the adopted promise if nothing else needs it
    let inner = never();
    let outer = Promise::resolve(inner.clone());
    outer.cancel();
    assert_eq!(inner.status(), Status::Cancelled);
}

#[test]
fn execution_errors_are_extended_through_adoption() {
    let host = Host::new();
    let _enter = host.exec.enter();

    let failing = Promise::from_fn(|| Err::<(), _>("deep"));
    let outer = Promise::resolve(failing);
    outer.catch(|_: Values| ());
    host.run();

    let err = outer.values()[0].clone();
    let err = err.as_error().unwrap();
    assert_eq!(*err.kind(), ErrorKind::ExecutionError);
    assert_eq!(err.parent().and_then(Error::message), Some("deep"));
    assert_eq!(err.chain().count(), 2);
}

#[test]
fn awaiting_reports_status() {
    let host = Host::new();

    let (ok, values) = host.exec.block_on(async { Promise::resolve(5).wait().await });
    assert!(ok);
    assert_eq!(values[0], Value::Int(5));

    let (status, _) = host.exec.block_on(async {
        let promise = never();
        promise.cancel();
        promise.wait_status().await
    });
    assert_eq!(status, Status::Cancelled);

    let expected = host.exec.block_on(async {
        let promise = never();
        promise.cancel();
        promise.await
    });
    let err = expected.unwrap_err();
    assert!(Error::is_kind(&err, &ErrorKind::AlreadyCancelled));

    let expected = host
        .exec
        .block_on(async { Promise::delay(Duration::from_millis(3)).and_then_return(4).await });
    assert_eq!(expected.unwrap()[0], Value::Int(4));
}

#[test]
fn unhandled_rejections_reach_the_hook() {
    let host = Host::new();
    let _enter = host.exec.enter();
    let reported = Rc::new(RefCell::new(Vec::new()));

    let hook = host.exec.on_unhandled_rejection({
        let reported = reported.clone();
        move |promise: &Promise, values: &Values| {
            reported.borrow_mut().push((promise.id(), values[0].clone()));
        }
    });

    let ignored = Promise::reject("ignored");
    let handled = Promise::reject("handled");
    handled.catch(|_: Values| ());
    host.run();

    assert_eq!(*reported.borrow(), [(ignored.id(), Value::from("ignored"))]);

    assert!(hook.unregister());
    Promise::reject("after");
    host.run();
    assert_eq!(reported.borrow().len(), 1);
}

#[test]
fn event_adapter_disconnects_after_the_first_match() {
    let host = Host::new();
    let _enter = host.exec.enter();
    let signal = kpromise::Signal::new();

    let promise = Promise::from_event_filtered(signal.clone(), |values: &Values| {
        values.first() == Some(&Value::from("go"))
    });
    signal.fire("wait");
    signal.fire("go");
    host.run();

    assert_eq!(promise.values()[0], Value::from("go"));
    assert_eq!(signal.listener_count(), 0);
}
