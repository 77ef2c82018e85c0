//! Tokio 实现层：暂停时钟下的超时竞争与观察任务。

use std::time::Duration;

use spark_context::{Cause, Context, ContextNode, Done, DoneSignal, TokioRuntime};

#[tokio::test(start_paused = true)]
async fn timeout_wins_select_against_slower_sleep() {
    let runtime = TokioRuntime::try_current()
        .expect("位于 Tokio 运行时内")
        .into_runtime();
    let (ctx, _cancel) = runtime.with_timeout(&Context::background(), Duration::from_millis(50));

    let outcome = tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(100)) => "didn't time out",
        _ = ctx.done() => "timed out",
    };
    assert_eq!(outcome, "timed out");
    assert_eq!(ctx.cause(), Some(Cause::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn cancel_aborts_pending_timer_task() {
    let runtime = TokioRuntime::try_current()
        .expect("位于 Tokio 运行时内")
        .into_runtime();
    let (ctx, cancel) = runtime.with_timeout(&Context::background(), Duration::from_secs(60));
    assert!(cancel.cancel());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(ctx.cause(), Some(Cause::Canceled), "取消后计时器不得改写原因");
}

#[test]
fn outside_runtime_no_handle_is_available() {
    assert!(TokioRuntime::try_current().is_none());
}

struct Drain(std::sync::Arc<DoneSignal>);

impl ContextNode for Drain {
    fn done(&self) -> Done {
        self.0.done()
    }

    fn cause(&self) -> Option<Cause> {
        self.0.is_fired().then_some(Cause::Custom("server.drain"))
    }
}

#[tokio::test]
async fn watcher_runs_as_tokio_task() {
    let runtime = TokioRuntime::try_current()
        .expect("位于 Tokio 运行时内")
        .into_runtime();
    let signal = std::sync::Arc::new(DoneSignal::new());
    let parent = Context::from_node(Drain(std::sync::Arc::clone(&signal)));
    let (child, _cancel) = runtime.with_cancel(&parent);

    signal.fire();
    tokio::time::timeout(Duration::from_secs(5), child.done())
        .await
        .expect("观察任务应在父节点关闭后终止子节点");
    assert_eq!(child.cause(), Some(Cause::Custom("server.drain")));
}
