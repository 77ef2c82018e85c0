//! 后台任务派生抽象。
//!
//! 以自定义节点为父节点的可取消子节点需要一个后台观察任务：等待父节点或自身任一完成。
//! 内建父节点通过子表同步级联，不会触发任何派生。

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::task::Context as TaskContext;
use std::sync::Arc;
use std::thread;

use futures::future::BoxFuture;
use futures::task::noop_waker_ref;
use parking_lot::Mutex;

use crate::config::RuntimeSettings;

/// 把后台 Future 交给宿主执行。
///
/// # 契约说明（What）
/// - `spawn` 不得阻塞调用线程，也不得在返回前同步轮询任务至完成；
/// - 任务以 `'static` 生命周期交付，实现方负责在后台驱动其完成或在宿主关闭时丢弃。
pub trait Spawner: Send + Sync + 'static {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// 为每个任务启动一条命名线程并以 `block_on` 驱动，不依赖任何异步运行时。
#[derive(Clone, Debug)]
pub struct ThreadSpawner {
    thread_name: String,
    stack_size: Option<usize>,
}

impl ThreadSpawner {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            stack_size: None,
        }
    }

    /// 指定观察线程栈大小。
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            thread_name: settings.watcher_thread_name.clone(),
            stack_size: settings.watcher_stack_size,
        }
    }
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

impl Spawner for ThreadSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        let mut builder = thread::Builder::new().name(self.thread_name.clone());
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        if let Err(error) = builder.spawn(move || futures::executor::block_on(task)) {
            tracing::error!(%error, thread = %self.thread_name, "failed to spawn watcher thread");
        }
    }
}

/// 手动驱动的派生器，测试中用于确定性地推进观察任务。
///
/// # 行为概览（How）
/// - `spawn` 只把任务放入队列；
/// - [`ManualSpawner::poll_pending`] 以空 waker 逐个轮询队列中的任务一次，保留仍未完成的任务；
/// - 克隆共享同一队列。
#[derive(Clone, Default)]
pub struct ManualSpawner {
    inner: Arc<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    queue: Mutex<Vec<BoxFuture<'static, ()>>>,
    spawned: AtomicUsize,
}

impl ManualSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 轮询全部排队任务一次，返回仍未完成的任务数。
    pub fn poll_pending(&self) -> usize {
        let tasks = std::mem::take(&mut *self.inner.queue.lock());
        let mut cx = TaskContext::from_waker(noop_waker_ref());
        let mut still_pending: Vec<_> = tasks
            .into_iter()
            .filter_map(|mut task| task.as_mut().poll(&mut cx).is_pending().then_some(task))
            .collect();

        let mut queue = self.inner.queue.lock();
        still_pending.append(&mut queue);
        *queue = still_pending;
        queue.len()
    }

    /// 自构造以来派生过的任务总数。
    pub fn spawned(&self) -> usize {
        self.inner.spawned.load(Ordering::SeqCst)
    }

    /// 队列中尚未完成的任务数。
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }
}

impl fmt::Debug for ManualSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualSpawner")
            .field("spawned", &self.spawned())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Spawner for ManualSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.inner.spawned.fetch_add(1, Ordering::SeqCst);
        self.inner.queue.lock().push(task);
    }
}
