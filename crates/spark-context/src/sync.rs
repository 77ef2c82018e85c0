//! 同步原语垫片。
//!
//! 启用 `--cfg loom`（配合 `loom-model` Feature）时切换为 Loom 提供的原子类型与互斥锁，
//! 以便模型检查穷举 [`crate::signal`] 的调度交错；常规构建使用 `parking_lot`。

#[cfg(not(any(loom, spark_loom)))]
pub(crate) use std::sync::Arc;
#[cfg(not(any(loom, spark_loom)))]
pub(crate) use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(any(loom, spark_loom))]
pub(crate) use loom::sync::Arc;
#[cfg(any(loom, spark_loom))]
pub(crate) use loom::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(any(loom, spark_loom)))]
pub(crate) use parking_lot::Mutex;

/// Loom 互斥锁的薄包装，使 `lock()` 与 `parking_lot` 的签名一致。
#[cfg(any(loom, spark_loom))]
#[derive(Debug)]
pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

#[cfg(any(loom, spark_loom))]
impl<T> Mutex<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(loom::sync::Mutex::new(value))
    }

    pub(crate) fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
