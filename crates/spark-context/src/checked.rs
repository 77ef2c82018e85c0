//! 接受可选参数的构造入口。
//!
//! 类型化构造器（[`Runtime::with_cancel`] 等）以 `&Context` 接收父节点，缺失父节点在编译期即不可表达。
//! 本模块面向参数来源不受控的边界代码（FFI 桥接、脚本宿主、反序列化后的调用描述）：
//! 缺失父节点或键时返回 [`ContextError::InvalidArgument`]，并记录一条错误日志，而不是 panic。

use core::any::Any;
use std::time::{Duration, Instant};

use crate::cancel::CancelHandle;
use crate::context::Context;
use crate::error::{ContextError, Result};
use crate::key::ValueKey;
use crate::runtime::Runtime;

/// 缺失父节点时的错误描述。
pub const NIL_PARENT: &str = "cannot create context from nil parent";

/// 值节点缺失键时的错误描述。
pub const NIL_KEY: &str = "nil key";

fn require_parent(parent: Option<&Context>) -> Result<&Context> {
    parent.ok_or_else(|| {
        tracing::error!(reason = NIL_PARENT, "context construction rejected");
        ContextError::InvalidArgument(NIL_PARENT)
    })
}

pub fn try_with_cancel(
    runtime: &Runtime,
    parent: Option<&Context>,
) -> Result<(Context, CancelHandle)> {
    Ok(runtime.with_cancel(require_parent(parent)?))
}

pub fn try_with_deadline(
    runtime: &Runtime,
    parent: Option<&Context>,
    deadline: Instant,
) -> Result<(Context, CancelHandle)> {
    Ok(runtime.with_deadline(require_parent(parent)?, deadline))
}

pub fn try_with_timeout(
    runtime: &Runtime,
    parent: Option<&Context>,
    timeout: Duration,
) -> Result<(Context, CancelHandle)> {
    Ok(runtime.with_timeout(require_parent(parent)?, timeout))
}

pub fn try_without_cancel(parent: Option<&Context>) -> Result<Context> {
    Ok(require_parent(parent)?.without_cancel())
}

/// 父节点检查先于键检查，与类型化入口的参数顺序一致。
pub fn try_with_value<K, V>(parent: Option<&Context>, key: Option<K>, value: V) -> Result<Context>
where
    K: ValueKey,
    V: Any + Send + Sync,
{
    let parent = require_parent(parent)?;
    let key = key.ok_or_else(|| {
        tracing::error!(reason = NIL_KEY, "context construction rejected");
        ContextError::InvalidArgument(NIL_KEY)
    })?;
    Ok(parent.with_value(key, value))
}
