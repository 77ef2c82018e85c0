//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 上下文原语的运行期操作全部是全函数：观测器总能成功，取消句柄幂等；
//! - 仅剩构造期误用与运行时装配两类失败，集中在 [`ContextError`] 中表达。
//!
//! ## 设计要求（What）
//! - 派生 `thiserror::Error`，可直接通过 `?` 传播到 `anyhow`/`Box<dyn Error>`；
//! - 构造期误用属于编程错误，类型化构造器在编译期即排除，只有 [`crate::checked`]
//!   中接受可选参数的入口会返回 [`ContextError::InvalidArgument`]。

use thiserror::Error;

/// 上下文库的错误域。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ContextError {
    /// 构造前置条件被违反（缺少父节点、值节点缺少键）。
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// 进程级运行时已经安装，不能重复覆盖。
    #[error("global context runtime already installed")]
    RuntimeAlreadyInstalled,

    /// 运行时配置解析或校验失败。
    #[error("invalid runtime settings `{field}`: {reason}")]
    InvalidSettings { field: &'static str, reason: String },
}

/// 本 crate 的统一结果别名。
pub type Result<T, E = ContextError> = core::result::Result<T, E>;
