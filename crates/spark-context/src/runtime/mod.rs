//! 上下文运行时：时钟与任务派生器的装配点。
//!
//! # 设计背景（Why）
//! - 截止节点需要读取当前时间并登记计时器，以自定义节点为父节点的可取消节点需要派生观察任务；
//!   两项能力都通过 [`Runtime`] 注入，使超时语义在测试中可由 [`crate::MockClock`] 完全确定；
//! - 进程级默认运行时供 crate 根部的自由函数使用，宿主可以在启动早期通过
//!   [`Runtime::install_global`] 替换一次。
//!
//! # 契约说明（What）
//! - [`Runtime`] 克隆成本为两次引用计数递增，可随上下文一起跨线程传递；
//! - 构造方法只在 `parent` 上派生，不修改父节点的任何可观测状态。

mod spawner;
#[cfg(feature = "runtime-tokio")]
mod tokio_runtime;

use core::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

pub use spawner::{ManualSpawner, Spawner, ThreadSpawner};
#[cfg(feature = "runtime-tokio")]
pub use tokio_runtime::TokioRuntime;

use crate::cancel::{self, CancelHandle, Label};
use crate::config::RuntimeSettings;
use crate::context::Context;
use crate::error::{ContextError, Result};
use crate::time::{Clock, SystemClock};

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

/// 时钟与派生器的组合。
#[derive(Clone)]
pub struct Runtime {
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn Spawner>,
}

impl Runtime {
    pub fn new(clock: Arc<dyn Clock>, spawner: Arc<dyn Spawner>) -> Self {
        Self { clock, spawner }
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// 按设置装配默认的线程化运行时。
    pub fn from_settings(settings: &RuntimeSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self::threaded(settings))
    }

    fn threaded(settings: &RuntimeSettings) -> Self {
        Self {
            clock: Arc::new(SystemClock::with_thread_name(
                settings.timer_thread_name.clone(),
            )),
            spawner: Arc::new(ThreadSpawner::from_settings(settings)),
        }
    }

    /// 进程级运行时；未安装时惰性创建默认配置的线程化运行时。
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| Self::threaded(&RuntimeSettings::default()))
    }

    /// 安装进程级运行时，只能在首次使用前成功一次。
    pub fn install_global(runtime: Runtime) -> Result<()> {
        GLOBAL.set(runtime).map_err(|_| {
            tracing::warn!("global context runtime already installed, keeping the existing one");
            ContextError::RuntimeAlreadyInstalled
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn spawner(&self) -> &Arc<dyn Spawner> {
        &self.spawner
    }

    /// 注入时钟的当前时间。
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// 派生可取消子节点。
    pub fn with_cancel(&self, parent: &Context) -> (Context, CancelHandle) {
        cancel::cancel_child(self, parent)
    }

    /// 派生在 `deadline` 到达时终止的子节点。
    ///
    /// 父节点截止时间不晚于 `deadline` 时等价于 [`Runtime::with_cancel`]；
    /// `deadline` 已经过去时，返回的子节点已处于 [`crate::Cause::DeadlineExceeded`] 状态。
    pub fn with_deadline(&self, parent: &Context, deadline: Instant) -> (Context, CancelHandle) {
        cancel::deadline_child(self, parent, deadline, Label::WithDeadline)
    }

    /// 以 `now() + timeout` 为截止点派生子节点。
    pub fn with_timeout(&self, parent: &Context, timeout: Duration) -> (Context, CancelHandle) {
        cancel::timeout_child(self, parent, timeout)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}

/// [`Runtime`] 构建器，未指定的部件使用默认线程化实现。
#[derive(Default)]
pub struct RuntimeBuilder {
    clock: Option<Arc<dyn Clock>>,
    spawner: Option<Arc<dyn Spawner>>,
}

impl RuntimeBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>),
            spawner: self
                .spawner
                .unwrap_or_else(|| Arc::new(ThreadSpawner::default()) as Arc<dyn Spawner>),
        }
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("custom_clock", &self.clock.is_some())
            .field("custom_spawner", &self.spawner.is_some())
            .finish()
    }
}
