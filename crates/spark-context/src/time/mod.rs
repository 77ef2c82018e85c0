//! 时间抽象模块，提供可注入的时钟接口以支撑截止/超时语义在测试中实现完全确定性。
//!
//! # 结构概览（What）
//! - [`Clock`]：核心时钟 trait，暴露 `now`/`arm` 两个原语与默认的 `sleep`；
//! - [`SystemClock`]：基于单个后台驱动线程的生产实现；
//! - [`MockClock`]：虚拟时钟，提供手动推进与计时器登记计数。
//!
//! # 使用指引（How）
//! - 构造上下文时通过 [`crate::Runtime`] 注入时钟；
//! - 在测试中使用 [`MockClock`] 手动推进时间并断言触发顺序。

pub mod clock;
mod driver;

pub use clock::{Clock, MockClock, Sleep, TimerCallback, TimerHandle};
pub use driver::{DEFAULT_TIMER_THREAD_NAME, SystemClock};
