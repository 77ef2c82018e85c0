//! 属性测试：随机构造的上下文链上的幂等、遮蔽与截止收紧不变式。

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use spark_context::{Cause, Context, ContextKey, ManualSpawner, MockClock, Runtime};

fn manual_runtime() -> (Runtime, MockClock) {
    let clock = MockClock::new();
    let runtime = Runtime::builder()
        .clock(Arc::new(clock.clone()))
        .spawner(Arc::new(ManualSpawner::new()))
        .build();
    (runtime, clock)
}

#[derive(Clone, Debug)]
enum Step {
    Cancel,
    Timeout(u64),
    Value(u8),
    Detach,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Cancel),
        (1u64..500).prop_map(Step::Timeout),
        any::<u8>().prop_map(Step::Value),
        Just(Step::Detach),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn only_first_cancel_reports_transition(calls in 1usize..16) {
        let (rt, _clock) = manual_runtime();
        let (ctx, cancel) = rt.with_cancel(&Context::background());
        let transitions = (0..calls).filter(|_| cancel.cancel()).count();
        prop_assert_eq!(transitions, 1);
        prop_assert_eq!(ctx.cause(), Some(Cause::Canceled));
    }

    #[test]
    fn nearest_value_shadows_ancestors(values in proptest::collection::vec(any::<u32>(), 1..12)) {
        let key = ContextKey::new("shadowed");
        let ctx = values
            .iter()
            .fold(Context::background(), |ctx, value| ctx.with_value(key, *value));
        let expected = values.last().copied();
        prop_assert_eq!(ctx.value_as::<u32>(&key).map(|v| *v), expected);
    }

    #[test]
    fn deadlines_only_tighten(timeouts in proptest::collection::vec(1u64..10_000, 1..8)) {
        let (rt, _clock) = manual_runtime();
        let mut ctx = Context::background();
        let mut previous = None;
        let mut handles = Vec::new();
        for millis in timeouts {
            let (child, handle) = rt.with_timeout(&ctx, Duration::from_millis(millis));
            handles.push(handle);
            if let (Some(before), Some(after)) = (previous, child.deadline()) {
                prop_assert!(after <= before, "子节点截止时间不得晚于父节点");
            }
            previous = child.deadline();
            ctx = child;
        }
    }

    #[test]
    fn random_chains_follow_the_nearest_detachment(steps in proptest::collection::vec(step(), 1..10)) {
        let (rt, clock) = manual_runtime();
        let (root, cancel_root) = rt.with_cancel(&Context::background());
        let mut ctx = root;
        let mut detached = false;
        let mut handles = Vec::new();
        let mut longest = 0u64;
        for step in steps {
            ctx = match step {
                Step::Cancel => {
                    let (child, handle) = rt.with_cancel(&ctx);
                    handles.push(handle);
                    child
                }
                Step::Timeout(millis) => {
                    longest = longest.max(millis);
                    let (child, handle) = rt.with_timeout(&ctx, Duration::from_secs(3600 + millis));
                    handles.push(handle);
                    child
                }
                Step::Value(byte) => ctx.with_value(ContextKey::new("step"), byte),
                Step::Detach => {
                    detached = true;
                    handles.clear();
                    ctx.without_cancel()
                }
            };
        }

        cancel_root.cancel();
        clock.advance(Duration::from_millis(longest));
        if detached {
            prop_assert_eq!(ctx.cause(), None);
        } else {
            prop_assert_eq!(ctx.cause(), Some(Cause::Canceled));
            prop_assert!(ctx.done().is_fired());
        }
    }
}
