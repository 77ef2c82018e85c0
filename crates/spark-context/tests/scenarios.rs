//! 端到端场景：以虚拟时钟与手动派生器复现超时、取消、脱离与截止收紧的典型用法。

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::future::{self, Either};
use spark_context::{Cause, Clock, Context, ContextKey, ManualSpawner, MockClock, Runtime};

fn manual_runtime() -> (Runtime, MockClock) {
    let clock = MockClock::new();
    let runtime = Runtime::builder()
        .clock(Arc::new(clock.clone()))
        .spawner(Arc::new(ManualSpawner::new()))
        .build();
    (runtime, clock)
}

#[test]
fn timeout_fires_before_slower_operation() {
    let (rt, clock) = manual_runtime();
    let (ctx, _cancel) = rt.with_timeout(&Context::background(), Duration::from_millis(50));
    let operation = clock.sleep(Duration::from_millis(100));
    let done = ctx.done();

    clock.advance(Duration::from_millis(50));
    let winner = futures::executor::block_on(future::select(done, operation));
    assert!(matches!(winner, Either::Left(_)), "超时信号应先于 100ms 操作就绪");
    assert_eq!(ctx.cause(), Some(Cause::DeadlineExceeded));
    assert_eq!(ctx.cause().map(|cause| cause.to_string()).as_deref(), Some("context deadline exceeded"));
}

#[test]
fn explicit_cancel_wakes_awaiter_with_caller_cause() {
    let (rt, _clock) = manual_runtime();
    let (ctx, cancel) = rt.with_cancel(&Context::background());

    let observed = ctx.clone();
    let awaiter = thread::spawn(move || {
        futures::executor::block_on(observed.done());
        observed.cause()
    });

    assert!(cancel.cancel());
    let recorded = awaiter.join().expect("等待线程应被唤醒");
    assert_eq!(recorded, Some(Cause::Canceled));
}

#[test]
fn detached_child_survives_parent_cancel() {
    let (rt, _clock) = manual_runtime();
    let (parent, cancel) = rt.with_cancel(&Context::background());
    let detached = parent.without_cancel();

    cancel.cancel();
    assert!(parent.done().is_fired());
    assert!(detached.done().is_never(), "脱离节点的完成信号永不就绪");
    assert_eq!(detached.cause(), None);
    assert_eq!(detached.deadline(), None);
}

#[test]
fn values_flow_through_detachment() {
    let (rt, _clock) = manual_runtime();
    let x = ContextKey::new("x");
    let (parent, cancel) = rt.with_cancel(&Context::background());
    let detached = parent.without_cancel();
    cancel.cancel();

    let child = detached.with_value(x, 42i32);
    assert_eq!(child.value_as::<i32>(&x).as_deref(), Some(&42));
}

#[test]
fn looser_deadline_reuses_parent_timer() {
    let (rt, clock) = manual_runtime();
    let now = clock.now();
    let (parent, _p) = rt.with_deadline(&Context::background(), now + Duration::from_millis(10));
    assert_eq!(clock.armed_timers(), 1);

    let (child, _c) = rt.with_deadline(&parent, now + Duration::from_secs(3600));
    assert_eq!(child.deadline(), parent.deadline());
    assert_eq!(clock.armed_timers(), 1, "不应为更宽松的截止时间登记计时器");

    clock.advance(Duration::from_millis(10));
    assert_eq!(child.cause(), Some(Cause::DeadlineExceeded), "子节点随父节点超时");
}

#[test]
fn past_deadline_is_already_expired() {
    let (rt, clock) = manual_runtime();
    let past = clock
        .now()
        .checked_sub(Duration::from_secs(1))
        .expect("单调时钟足以回退一秒");
    let (ctx, cancel) = rt.with_deadline(&Context::background(), past);

    assert!(ctx.done().is_fired());
    assert_eq!(ctx.cause(), Some(Cause::DeadlineExceeded));
    assert_eq!(ctx.deadline(), Some(past));
    assert!(!cancel.cancel(), "已超时节点的取消不改写原因");
    assert_eq!(ctx.cause(), Some(Cause::DeadlineExceeded));
}
