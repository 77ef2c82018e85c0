//! 请求级键值的键抽象。
//!
//! # 设计背景（Why）
//! - 值节点沿父链查找第一个“键相等”的祖先；键的相等性决定了不同模块之间是否会意外串值；
//! - 推荐调用方使用模块私有的 [`ContextKey`]：每次 `new` 都得到只与自身（及其拷贝）相等的令牌，
//!   无法被其他模块伪造。
//!
//! # 契约说明（What）
//! - 任意 `T: Any + PartialEq + Debug + Send + Sync` 自动实现 [`ValueKey`]，按结构相等比较；
//! - 比较区分类型：`1u32` 与 `1u64` 永不相等，字符串字面量 `"x"` 与 `String::from("x")` 亦不相等。

use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 值节点中存放的值，按需通过 [`crate::Context::value_as`] 向下转型。
pub type Value = Arc<dyn Any + Send + Sync>;

/// 可作为上下文键的类型。
pub trait ValueKey: Any + Send + Sync + fmt::Debug {
    /// 判断 `other` 是否与自身相等（类型相同且值相等）。
    fn matches(&self, other: &dyn ValueKey) -> bool;

    /// 以 `Any` 视图暴露自身，供 `matches` 向下转型。
    fn as_any(&self) -> &dyn Any;
}

impl<T> ValueKey for T
where
    T: Any + PartialEq + Send + Sync + fmt::Debug,
{
    fn matches(&self, other: &dyn ValueKey) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// 以身份区分的键令牌。
///
/// 名称仅用于诊断输出，不参与比较：两个同名的 `ContextKey` 互不相等。
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey {
    id: u64,
    name: &'static str,
}

impl ContextKey {
    /// 分配一个新的、全局唯一的键。
    pub fn new(name: &'static str) -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            name,
        }
    }

    /// 诊断名称。
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({}#{})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_keys_only_match_their_copies() {
        let first = ContextKey::new("request.id");
        let twin = ContextKey::new("request.id");
        let copy = first;
        assert!(first.matches(&copy));
        assert!(!first.matches(&twin), "同名键不得相等");
    }

    #[test]
    fn structural_keys_are_type_sensitive() {
        assert!(ValueKey::matches(&"tenant", &"tenant"));
        assert!(!ValueKey::matches(&"tenant", &String::from("tenant")));
        assert!(ValueKey::matches(&7u32, &7u32));
        assert!(!ValueKey::matches(&7u32, &7u64));
    }

    #[test]
    fn debug_output_includes_name() {
        let key = ContextKey::new("trace.parent");
        assert!(format!("{key:?}").starts_with("ContextKey(trace.parent#"));
    }
}
