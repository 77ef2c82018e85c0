//! Tokio 实现层：以 Tokio 的计时器与任务系统承载截止计时与观察任务。
//!
//! 宿主 Tokio 运行时必须启用时间驱动（`enable_time`/`enable_all`），否则计时任务会在首次 poll 时 panic。
//! 在 `#[tokio::test(start_paused = true)]` 下，`tokio::time::advance` 同样推进本时钟。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use super::{Runtime, Spawner};
use crate::time::{Clock, TimerCallback, TimerHandle};

/// 绑定到某个 Tokio 运行时句柄的时钟与派生器。
#[derive(Clone, Debug)]
pub struct TokioRuntime {
    handle: Handle,
}

impl TokioRuntime {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// 绑定到当前线程所在的 Tokio 运行时；不在运行时上下文中时返回 `None`。
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// 组装为同时使用 Tokio 时钟与派生器的 [`Runtime`]。
    pub fn into_runtime(self) -> Runtime {
        let shared = Arc::new(self);
        Runtime::new(shared.clone(), shared)
    }
}

impl Clock for TokioRuntime {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn arm(&self, after: Duration, callback: TimerCallback) -> TimerHandle {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            callback();
        });
        let abort = task.abort_handle();
        TimerHandle::from_fn(move || {
            let pending = !abort.is_finished();
            abort.abort();
            pending
        })
    }
}

impl Spawner for TokioRuntime {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        drop(self.handle.spawn(task));
    }
}
