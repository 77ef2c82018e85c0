//! 可取消节点与截止节点的共享内核。
//!
//! # 设计背景（Why）
//! - 取消沿父子关系单向传播：父节点终止时，所有尚未终止的可取消后代以相同原因终止；
//! - 父节点是内建可取消节点时，子节点直接登记进父节点的子表，父节点取消时同步级联，
//!   不需要任何后台任务；只有父节点是自定义实现时才退化为通过 [`crate::Spawner`] 派生观察任务。
//!
//! # 逻辑解析（How）
//! - [`CancelCore`] 以互斥锁保护“子表、计时器、父节点弱引用”三项可变状态；
//!   原因槽位在锁内写入，完成信号在原因写入之后触发，观测者看到信号即可读到原因；
//! - 终止时在锁内取走子表与计时器，释放锁后再停表、从父节点摘除自身，
//!   取走的子节点压入工作栈逐个终止，级联深度不占用调用栈；
//!   任何时刻都不会同时持有两个节点的锁（`adopt` 中父在前、子在后的短暂嵌套除外）；
//! - 释放未取消的子树同样借助工作栈逐层拆除子表，避免析构递归。
//! - 登记子节点时若父节点已终止，则立即以父节点原因取消子节点，堵住“构造与取消并发”的窗口。
//!
//! # 风险提示（Trade-offs）
//! - 子表持有子节点的强引用：未取消的长寿父节点会一直保留已被调用方丢弃、但从未取消的子节点，
//!   调用方应在完成工作后调用 [`CancelHandle::cancel`] 释放资源。

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use futures::future::{self, Either};
use parking_lot::Mutex;

use crate::cause::Cause;
use crate::context::{Context, Node};
use crate::runtime::Runtime;
use crate::signal::{Done, DoneSignal};
use crate::time::TimerHandle;

static NEXT_CORE_ID: AtomicU64 = AtomicU64::new(1);

/// 诊断字符串中的构造器后缀。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Label {
    WithCancel,
    WithDeadline,
    WithTimeout,
}

impl Label {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Label::WithCancel => "WithCancel",
            Label::WithDeadline => "WithDeadline",
            Label::WithTimeout => "WithTimeout",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct CancelNode {
    parent: Context,
    core: Arc<CancelCore>,
    deadline: Option<Instant>,
    label: Label,
}

impl CancelNode {
    pub(crate) fn parent(&self) -> &Context {
        &self.parent
    }

    pub(crate) fn core(&self) -> &Arc<CancelCore> {
        &self.core
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn label(&self) -> Label {
        self.label
    }

    /// 析构时取出父节点，以空根占位。
    pub(crate) fn take_parent(&mut self) -> Context {
        mem::replace(&mut self.parent, Context::background())
    }
}

#[derive(Default)]
struct CoreState {
    children: HashMap<u64, Arc<CancelCore>>,
    parent: Option<Weak<CancelCore>>,
    timer: Option<TimerHandle>,
}

pub(crate) struct CancelCore {
    id: u64,
    signal: DoneSignal,
    cause: OnceLock<Cause>,
    state: Mutex<CoreState>,
}

impl CancelCore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CORE_ID.fetch_add(1, Ordering::Relaxed),
            signal: DoneSignal::new(),
            cause: OnceLock::new(),
            state: Mutex::new(CoreState::default()),
        })
    }

    pub(crate) fn done(&self) -> Done {
        self.signal.done()
    }

    pub(crate) fn cause(&self) -> Option<Cause> {
        self.cause.get().copied()
    }

    fn is_cancelled(&self) -> bool {
        self.cause.get().is_some()
    }

    /// 终止本节点并级联到全部已登记的子节点；只有首个调用者生效。
    fn cancel(self: &Arc<Self>, cause: Cause) -> bool {
        self.terminate(cause, true)
    }

    /// 以工作栈逐层终止后代，栈深与树深无关。
    fn terminate(self: &Arc<Self>, cause: Cause, detach: bool) -> bool {
        let Some(mut pending) = self.seal(cause, detach) else {
            return false;
        };
        while let Some(core) = pending.pop() {
            // 级联路径上的父节点子表已被取走，后代无需再摘除自身。
            if let Some(children) = core.seal(cause, false) {
                pending.extend(children);
            }
        }
        true
    }

    /// 写入原因、触发信号并释放计时器，返回被取走的子节点；原因已存在时返回 `None`。
    fn seal(&self, cause: Cause, detach: bool) -> Option<Vec<Arc<CancelCore>>> {
        let (children, timer, parent) = {
            let mut state = self.state.lock();
            if self.cause.set(cause).is_err() {
                return None;
            }
            (
                mem::take(&mut state.children),
                state.timer.take(),
                state.parent.take(),
            )
        };
        self.signal.fire();

        tracing::debug!(
            context.id = self.id,
            cause = cause.code(),
            children = children.len(),
            "context terminated"
        );

        if let Some(timer) = timer {
            let stopped = timer.stop();
            tracing::trace!(context.id = self.id, stopped, "deadline timer released");
        }

        if detach {
            if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
                parent.state.lock().children.remove(&self.id);
            }
        }
        Some(children.into_values().collect())
    }

    /// 把 `child` 登记为本节点的子节点；本节点已终止时改为立即取消子节点。
    fn adopt(self: &Arc<Self>, child: &Arc<CancelCore>) {
        let mut state = self.state.lock();
        if let Some(cause) = self.cause() {
            drop(state);
            tracing::trace!(
                context.id = child.id,
                parent.id = self.id,
                "parent already terminated, cancelling child at construction"
            );
            child.terminate(cause, false);
            return;
        }

        {
            let mut child_state = child.state.lock();
            if child.is_cancelled() {
                return;
            }
            child_state.parent = Some(Arc::downgrade(self));
        }
        state.children.insert(child.id, Arc::clone(child));
    }

    /// 安装截止计时器；若节点已终止则立即停止计时器。
    fn install_timer(&self, timer: TimerHandle) {
        let mut state = self.state.lock();
        if self.is_cancelled() {
            drop(state);
            timer.stop();
            return;
        }
        state.timer = Some(timer);
    }

    #[cfg(test)]
    fn child_count(&self) -> usize {
        self.state.lock().children.len()
    }
}

impl Drop for CancelCore {
    fn drop(&mut self) {
        let mut pending: Vec<Arc<CancelCore>> =
            mem::take(&mut self.state.get_mut().children).into_values().collect();
        while let Some(core) = pending.pop() {
            if let Ok(mut core) = Arc::try_unwrap(core) {
                pending.extend(mem::take(&mut core.state.get_mut().children).into_values());
            }
        }
    }
}

/// 取消可取消节点（及其全部后代）的句柄。
///
/// 句柄可克隆并跨线程共享，[`CancelHandle::cancel`] 幂等：只有首次触发终止的调用返回 `true`，
/// 之后的调用以及在截止计时器触发之后的调用都不会改写原因。
#[derive(Clone)]
pub struct CancelHandle {
    core: Arc<CancelCore>,
}

impl CancelHandle {
    /// 以 [`Cause::Canceled`] 终止关联节点。
    pub fn cancel(&self) -> bool {
        self.core.cancel(Cause::Canceled)
    }

    /// 关联节点是否已经终止（无论原因）。
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.core.id)
            .field("cause", &self.core.cause())
            .finish()
    }
}

/// 派生可取消子节点，截止时间继承自父节点。
pub(crate) fn cancel_child(runtime: &Runtime, parent: &Context) -> (Context, CancelHandle) {
    let core = CancelCore::new();
    let context = Context::from_variant(Node::Cancel(CancelNode {
        parent: parent.clone(),
        core: Arc::clone(&core),
        deadline: parent.deadline(),
        label: Label::WithCancel,
    }));
    propagate(runtime, parent, &core);
    (context, CancelHandle { core })
}

/// 派生截止子节点。
///
/// 父节点的截止时间不晚于 `deadline` 时不会创建计时器，直接退化为可取消子节点。
pub(crate) fn deadline_child(
    runtime: &Runtime,
    parent: &Context,
    deadline: Instant,
    label: Label,
) -> (Context, CancelHandle) {
    if let Some(inherited) = parent.deadline() {
        if inherited <= deadline {
            tracing::trace!(?inherited, requested = ?deadline, "parent deadline is tighter, no timer armed");
            return cancel_child(runtime, parent);
        }
    }

    let core = CancelCore::new();
    let context = Context::from_variant(Node::Cancel(CancelNode {
        parent: parent.clone(),
        core: Arc::clone(&core),
        deadline: Some(deadline),
        label,
    }));
    propagate(runtime, parent, &core);

    let clock = runtime.clock();
    let remaining = deadline.saturating_duration_since(clock.now());
    if remaining.is_zero() {
        core.cancel(Cause::DeadlineExceeded);
    } else if !core.is_cancelled() {
        let target = Arc::clone(&core);
        let timer = clock.arm(
            remaining,
            Box::new(move || {
                target.cancel(Cause::DeadlineExceeded);
            }),
        );
        tracing::trace!(context.id = core.id, ?remaining, "deadline timer armed");
        core.install_timer(timer);
    }
    (context, CancelHandle { core })
}

/// 以相对时长派生截止子节点；截止点超出 [`Instant`] 可表示范围时视为没有截止时间。
pub(crate) fn timeout_child(
    runtime: &Runtime,
    parent: &Context,
    timeout: Duration,
) -> (Context, CancelHandle) {
    match runtime.now().checked_add(timeout) {
        Some(deadline) => deadline_child(runtime, parent, deadline, Label::WithTimeout),
        None => cancel_child(runtime, parent),
    }
}

/// 把子节点挂到父节点的取消传播链上。
fn propagate(runtime: &Runtime, parent: &Context, child: &Arc<CancelCore>) {
    let parent_done = parent.done();
    if parent_done.is_never() {
        return;
    }

    if let Some(core) = parent.nearest_canceler() {
        core.adopt(child);
        return;
    }

    if parent_done.is_fired() {
        child.terminate(parent.cause().unwrap_or(Cause::Canceled), false);
        return;
    }

    tracing::debug!(context.id = child.id, parent = %parent, "spawning watcher for foreign parent");
    let watched = parent.clone();
    let own_done = child.done();
    let child = Arc::clone(child);
    runtime.spawner().spawn(Box::pin(async move {
        if let Either::Left(_) = future::select(parent_done, own_done).await {
            child.terminate(watched.cause().unwrap_or(Cause::Canceled), false);
        }
        tracing::trace!(context.id = child.id, "watcher finished");
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ManualSpawner;
    use crate::time::{Clock, MockClock};

    fn runtime() -> (Runtime, MockClock) {
        let clock = MockClock::new();
        let runtime = Runtime::builder()
            .clock(Arc::new(clock.clone()))
            .spawner(Arc::new(ManualSpawner::new()))
            .build();
        (runtime, clock)
    }

    fn core_of(context: &Context) -> Arc<CancelCore> {
        Arc::clone(context.nearest_canceler().expect("可取消节点"))
    }

    #[test]
    fn cancelled_child_leaves_parent_registry() {
        let (rt, _clock) = runtime();
        let (parent, _parent_handle) = cancel_child(&rt, &Context::background());
        let (_child, child_handle) = cancel_child(&rt, &parent);
        let parent_core = core_of(&parent);
        assert_eq!(parent_core.child_count(), 1);

        assert!(child_handle.cancel());
        assert_eq!(parent_core.child_count(), 0, "取消后应从父节点子表摘除");
    }

    #[test]
    fn cascade_drains_registry_and_keeps_first_cause() {
        let (rt, clock) = runtime();
        let (parent, parent_handle) =
            deadline_child(&rt, &Context::background(), clock.now() + Duration::from_secs(1), Label::WithDeadline);
        let (child, _child_handle) = cancel_child(&rt, &parent);

        assert!(parent_handle.cancel());
        clock.advance(Duration::from_secs(2));
        assert_eq!(parent.cause(), Some(Cause::Canceled));
        assert_eq!(child.cause(), Some(Cause::Canceled));
        assert_eq!(core_of(&parent).child_count(), 0);
        assert_eq!(clock.pending_timers(), 0, "取消应释放截止计时器");
    }

    #[test]
    fn expired_deadline_never_arms_a_timer() {
        let (rt, clock) = runtime();
        let (ctx, handle) = deadline_child(&rt, &Context::background(), clock.now(), Label::WithDeadline);
        assert_eq!(ctx.cause(), Some(Cause::DeadlineExceeded));
        assert!(handle.is_cancelled());
        assert!(!handle.cancel());
        assert_eq!(clock.armed_timers(), 0);
    }
}
