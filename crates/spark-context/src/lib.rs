#![deny(unsafe_code)]

//! `spark-context` 提供树形的取消、截止时间与请求级键值传播原语。
//!
//! # 模块定位（Why）
//! - 一次请求往往横跨多个线程与后台任务；调用链上的每一环都需要知道“这次工作是否仍然需要”
//!   以及“最迟何时必须结束”，并能读取请求级元数据（追踪 ID、租户等）；
//! - 以不可变节点组成的树表达这些信息：子节点继承父节点的终止信号，但终止只向下传播，
//!   从不影响祖先或兄弟节点。
//!
//! # 设计概要（How）
//! - [`Context`] 是节点的共享句柄，节点分为空根、可取消、截止、值、脱离与自定义六类；
//! - 可取消/截止节点持有一次性广播信号（[`Done`]）与只写一次的原因槽位（[`Cause`]），
//!   父节点为内建可取消节点时，子节点登记进父节点的子表并在父节点终止时同步级联；
//! - 时间与后台任务通过 [`Runtime`] 注入：生产环境使用 [`SystemClock`] 与 [`ThreadSpawner`]，
//!   测试使用 [`MockClock`] 与 [`ManualSpawner`]，启用 `runtime-tokio` 后可改用 `TokioRuntime`。
//!
//! # 使用示例
//! ```
//! use std::time::Duration;
//! use spark_context::{background, with_timeout, Cause};
//!
//! let (ctx, cancel) = with_timeout(&background(), Duration::from_secs(30));
//! assert!(ctx.deadline().is_some());
//! assert!(cancel.cancel());
//! assert_eq!(ctx.cause(), Some(Cause::Canceled));
//! assert_eq!(ctx.to_string(), "context.Background.WithTimeout");
//! ```

mod cancel;
pub mod cause;
pub mod checked;
pub mod config;
mod context;
pub mod error;
pub mod key;
pub mod runtime;
pub mod signal;
mod sync;
pub mod time;

use core::any::Any;
use std::time::{Duration, Instant};

pub use cancel::CancelHandle;
pub use cause::Cause;
pub use config::RuntimeSettings;
pub use context::{Context, ContextNode};
pub use error::{ContextError, Result};
pub use key::{ContextKey, Value, ValueKey};
#[cfg(feature = "runtime-tokio")]
pub use runtime::TokioRuntime;
pub use runtime::{ManualSpawner, Runtime, RuntimeBuilder, Spawner, ThreadSpawner};
pub use signal::{Done, DoneSignal};
pub use time::{Clock, MockClock, SystemClock, TimerHandle};

/// 进程级默认根节点，见 [`Context::background`]。
pub fn background() -> Context {
    Context::background()
}

/// 占位根节点，见 [`Context::todo`]。
pub fn todo() -> Context {
    Context::todo()
}

/// 以进程级运行时派生可取消子节点。
pub fn with_cancel(parent: &Context) -> (Context, CancelHandle) {
    Runtime::global().with_cancel(parent)
}

/// 以进程级运行时派生截止子节点。
pub fn with_deadline(parent: &Context, deadline: Instant) -> (Context, CancelHandle) {
    Runtime::global().with_deadline(parent, deadline)
}

/// 以进程级运行时派生超时子节点。
pub fn with_timeout(parent: &Context, timeout: Duration) -> (Context, CancelHandle) {
    Runtime::global().with_timeout(parent, timeout)
}

pub fn with_value<K, V>(parent: &Context, key: K, value: V) -> Context
where
    K: ValueKey,
    V: Any + Send + Sync,
{
    parent.with_value(key, value)
}

pub fn without_cancel(parent: &Context) -> Context {
    parent.without_cancel()
}
