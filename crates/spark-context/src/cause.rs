//! 上下文终止原因。
//!
//! 完成信号本身不携带原因；调用方在观测到 `done()` 就绪后读取 [`Cause`] 以区分“主动取消”
//! 与“截止超时”。原因一经写入便不再变化。

use thiserror::Error;

/// 上下文进入终止状态的原因码。
///
/// # 契约说明（What）
/// - `Canceled`：取消句柄是首个触发者；
/// - `DeadlineExceeded`：截止计时器触发，或构造时截止时间已经过去；
/// - `Custom`：由自定义父节点（[`crate::ContextNode`]）报告的原因码，向子节点原样透传。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum Cause {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("context closed: {0}")]
    Custom(&'static str),
}

impl Cause {
    /// 是否由取消句柄触发。
    pub fn is_canceled(&self) -> bool {
        matches!(self, Cause::Canceled)
    }

    /// 是否由截止时间触发。
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Cause::DeadlineExceeded)
    }

    /// 稳定的点分原因码，便于日志与指标聚合。
    pub fn code(&self) -> &'static str {
        match self {
            Cause::Canceled => "spark.context.canceled",
            Cause::DeadlineExceeded => "spark.context.deadline_exceeded",
            Cause::Custom(code) => code,
        }
    }
}
