//! 上下文树的节点模型与只读观测接口。
//!
//! # 设计背景（Why）
//! - 调用链上的每一环只需要一个可克隆的句柄，就能读取截止时间、等待完成信号、查询请求级键值；
//! - 节点一经构造便不可变，派生只会新增子节点，观测者之间无需任何协调。
//!
//! # 逻辑解析（How）
//! - [`Context`] 包装 `Arc<Node>`，`Node` 枚举空根、可取消、值、脱离与自定义五种变体，
//!   截止节点复用可取消变体；
//! - 值节点对截止时间、信号与原因透明，观测接口先跳过值节点再读取真正的信号源；
//! - 键值查询、诊断字符串与析构都沿父链迭代展开，链长不占用调用栈。
//!
//! # 契约说明（What）
//! - 所有观测接口不阻塞、不修改节点状态；
//! - 诊断字符串由根到叶拼接，如 `context.Background.WithValue.WithCancel`。

use core::any::Any;
use core::fmt;
use std::mem;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::cancel::{CancelCore, CancelNode};
use crate::cause::Cause;
use crate::key::{Value, ValueKey};
use crate::signal::Done;

/// 自定义上下文节点的扩展点。
///
/// # 设计背景（Why）
/// - 内建变体（空根、可取消、截止、值、脱离）覆盖了绝大多数场景，但宿主框架常需要把
///   自有的生命周期对象（如连接、会话）接入上下文树，使其关闭能够向下传播；
/// - 所有方法均有“空节点”语义的默认实现，实现者只需覆写关心的部分。
///
/// # 契约说明（What）
/// - `done` 返回的句柄一旦就绪，`cause` 必须在下一次读取时返回 `Some`；
/// - `cause` 一旦返回 `Some` 便不得再变化；
/// - `describe` 返回 `None` 时，该节点及其子节点的诊断字符串以 `<unknown>` 作为前缀；
/// - 以自定义节点为父节点的可取消子节点通过注入的 [`crate::Spawner`] 派生观察任务完成传播。
pub trait ContextNode: Send + Sync + 'static {
    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn done(&self) -> Done {
        Done::never()
    }

    fn cause(&self) -> Option<Cause> {
        None
    }

    fn value(&self, key: &dyn ValueKey) -> Option<Value> {
        let _ = key;
        None
    }

    fn describe(&self) -> Option<String> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Root {
    Background,
    Todo,
}

pub(crate) struct ValueNode {
    parent: Context,
    key: Box<dyn ValueKey>,
    value: Value,
    done: Done,
}

pub(crate) enum Node {
    Root(Root),
    Cancel(CancelNode),
    Value(ValueNode),
    Detached(Context),
    Custom(Box<dyn ContextNode>),
}

impl Node {
    /// 取出父节点并以空根占位，供迭代析构使用。
    fn take_parent(&mut self) -> Option<Context> {
        match self {
            Node::Cancel(node) => Some(node.take_parent()),
            Node::Value(node) => Some(mem::replace(&mut node.parent, Context::background())),
            Node::Detached(parent) => Some(mem::replace(parent, Context::background())),
            Node::Root(_) | Node::Custom(_) => None,
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut next = self.take_parent();
        while let Some(parent) = next {
            // 仍被其他句柄共享的父节点到此为止。
            next = match Arc::try_unwrap(parent.node) {
                Ok(mut node) => node.take_parent(),
                Err(_) => None,
            };
        }
    }
}

static BACKGROUND: OnceLock<Context> = OnceLock::new();
static TODO: OnceLock<Context> = OnceLock::new();

/// 树形上下文句柄：携带取消信号、可选截止时间与请求级键值。
///
/// # 设计背景（Why）
/// - 统一承载“取消、截止、请求值”三元组，调用链上任意环节都可以派生子上下文，
///   子节点继承父节点的信号，但取消与超时只向下传播、从不影响祖先；
/// - 句柄内部以 [`Arc`] 共享，克隆成本为常数，可自由跨线程传递。
///
/// # 契约说明（What）
/// - 观测器 [`Context::deadline`]、[`Context::done`]、[`Context::cause`]、[`Context::value`]
///   均不阻塞；
/// - 空根与脱离节点的 `done()` 返回永不就绪的句柄，而非“缺失”；
/// - 可取消/截止节点的原因一经写入便不再变化，观测到 `done()` 就绪的线程随后读取
///   `cause()` 必然得到 `Some`。
#[derive(Clone)]
pub struct Context {
    node: Arc<Node>,
}

impl Context {
    /// 进程级默认根节点。
    pub fn background() -> Context {
        BACKGROUND
            .get_or_init(|| Context::from_variant(Node::Root(Root::Background)))
            .clone()
    }

    /// 占位根节点，语义与 [`Context::background`] 相同，仅诊断字符串不同。
    pub fn todo() -> Context {
        TODO.get_or_init(|| Context::from_variant(Node::Root(Root::Todo)))
            .clone()
    }

    /// 将自定义节点包装为上下文句柄。
    pub fn from_node(node: impl ContextNode) -> Context {
        Context::from_variant(Node::Custom(Box::new(node)))
    }

    pub(crate) fn from_variant(node: Node) -> Context {
        Context {
            node: Arc::new(node),
        }
    }

    /// 派生携带一对键值的子节点。
    ///
    /// 值节点不分配信号、计时器或原因槽位；截止时间、完成信号与原因全部委托给父节点。
    /// 推荐以模块私有的 [`crate::ContextKey`] 作为键，避免不同模块间按结构相等意外串值。
    pub fn with_value<K, V>(&self, key: K, value: V) -> Context
    where
        K: ValueKey,
        V: Any + Send + Sync,
    {
        Context::from_variant(Node::Value(ValueNode {
            parent: self.clone(),
            key: Box::new(key),
            value: Arc::new(value),
            done: self.done(),
        }))
    }

    /// 派生只继承键值、不继承取消的子节点。
    ///
    /// 脱离节点没有截止时间、完成信号永不就绪、原因恒为 `None`，适合在请求结束后继续运行的后台任务。
    pub fn without_cancel(&self) -> Context {
        Context::from_variant(Node::Detached(self.clone()))
    }

    /// 有效截止时间；空根、脱离节点以及父链上没有截止时间的可取消节点返回 `None`。
    pub fn deadline(&self) -> Option<Instant> {
        match &*self.signal_source().node {
            Node::Cancel(node) => node.deadline(),
            Node::Custom(node) => node.deadline(),
            Node::Root(_) | Node::Detached(_) | Node::Value(_) => None,
        }
    }

    /// 完成信号的可选择句柄。
    pub fn done(&self) -> Done {
        match &*self.node {
            Node::Cancel(node) => node.core().done(),
            Node::Value(node) => node.done.clone(),
            Node::Custom(node) => node.done(),
            Node::Root(_) | Node::Detached(_) => Done::never(),
        }
    }

    /// 当前终止原因；尚未终止时为 `None`。
    pub fn cause(&self) -> Option<Cause> {
        match &*self.signal_source().node {
            Node::Cancel(node) => node.core().cause(),
            Node::Custom(node) => node.cause(),
            Node::Root(_) | Node::Detached(_) | Node::Value(_) => None,
        }
    }

    /// 自下而上沿父链查找第一个键相等的值。
    pub fn value(&self, key: &dyn ValueKey) -> Option<Value> {
        let mut current = self;
        loop {
            match &*current.node {
                Node::Value(node) => {
                    if node.key.matches(key) {
                        return Some(Arc::clone(&node.value));
                    }
                    current = &node.parent;
                }
                Node::Cancel(node) => current = node.parent(),
                Node::Detached(parent) => current = parent,
                Node::Custom(node) => return node.value(key),
                Node::Root(_) => return None,
            }
        }
    }

    /// 按类型读取值；命中的键若存放了其他类型的值，返回 `None` 而不会继续向上查找。
    pub fn value_as<V>(&self, key: &dyn ValueKey) -> Option<Arc<V>>
    where
        V: Any + Send + Sync,
    {
        self.value(key).and_then(|value| value.downcast::<V>().ok())
    }

    /// 两个句柄是否指向同一节点。
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// 最近的自带信号的内建取消节点；值节点透明跳过，遇到脱离、空根或自定义节点即停止。
    pub(crate) fn nearest_canceler(&self) -> Option<&Arc<CancelCore>> {
        match &*self.signal_source().node {
            Node::Cancel(node) => Some(node.core()),
            _ => None,
        }
    }

    /// 跳过值节点，返回真正决定截止/信号/原因的节点。
    fn signal_source(&self) -> &Context {
        let mut current = self;
        while let Node::Value(node) = &*current.node {
            current = &node.parent;
        }
        current
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut suffixes = Vec::new();
        let mut current = self;
        loop {
            match &*current.node {
                Node::Root(Root::Background) => break f.write_str("context.Background")?,
                Node::Root(Root::Todo) => break f.write_str("context.TODO")?,
                Node::Custom(node) => match node.describe() {
                    Some(name) => break f.write_str(&name)?,
                    None => break f.write_str("<unknown>")?,
                },
                Node::Cancel(node) => {
                    suffixes.push(node.label().as_str());
                    current = node.parent();
                }
                Node::Value(node) => {
                    suffixes.push("WithValue");
                    current = &node.parent;
                }
                Node::Detached(parent) => {
                    suffixes.push("WithoutCancel");
                    current = parent;
                }
            }
        }
        for suffix in suffixes.iter().rev() {
            write!(f, ".{suffix}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &format_args!("{self}"))
            .field("deadline", &self.deadline())
            .field("cause", &self.cause())
            .finish()
    }
}
