//! 一次性广播信号：`pending -> fired` 单向迁移，可被任意数量的等待者观测。
//!
//! # 设计背景（Why）
//! - 上下文的完成信号需要放入多路等待（与 I/O、其他上下文一起 `select`），因此必须以
//!   `Future` 形式暴露“可选择”的句柄，而非仅提供阻塞式 `wait`；
//! - 空根与脱离节点需要一个永不就绪的句柄，它不得占用任何等待槽位，也不得被误认为“缺失”。
//!
//! # 逻辑解析（How）
//! - 触发标志使用原子布尔，`fire` 以 `swap` 保证只有首次调用生效（Release 发布）；
//! - 等待者的 waker 存放在带空闲槽复用的 slab 中，`Done` 被丢弃时归还槽位；
//! - `poll` 在持锁后复查触发标志，确保与 `fire` 并发注册的等待者不会丢失唤醒。
//!
//! # 契约说明（What）
//! - [`DoneSignal::fire`] 幂等，首次返回 `true`；
//! - [`Done`] 实现 `Future<Output = ()>`、`Clone`、`Unpin`，克隆得到独立的等待者；
//! - [`Done::never`] 永远返回 `Poll::Pending`，不分配内存。

use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context as TaskContext, Poll, Waker};

use crate::sync::{Arc, AtomicBool, Mutex, Ordering};

struct SignalInner {
    fired: AtomicBool,
    waiters: Mutex<WaiterSlab>,
}

/// 等待者槽位表，空闲槽位复用以避免 `Vec` 在频繁取消等待时无界增长。
#[derive(Default)]
struct WaiterSlab {
    entries: Vec<Option<Waker>>,
    free: Vec<usize>,
}

impl WaiterSlab {
    fn insert(&mut self, waker: Waker) -> usize {
        match self.free.pop() {
            Some(index) => {
                self.entries[index] = Some(waker);
                index
            }
            None => {
                self.entries.push(Some(waker));
                self.entries.len() - 1
            }
        }
    }

    fn update(&mut self, index: usize, waker: &Waker) {
        if let Some(Some(existing)) = self.entries.get_mut(index) {
            if !existing.will_wake(waker) {
                *existing = waker.clone();
            }
        }
    }

    fn remove(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            if entry.take().is_some() {
                self.free.push(index);
            }
        }
    }

    fn drain(&mut self) -> Vec<Waker> {
        self.free.clear();
        self.entries.drain(..).flatten().collect()
    }

    fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }
}

/// 信号的所有者一侧，仅持有者可以触发。
pub struct DoneSignal {
    inner: Arc<SignalInner>,
}

impl DoneSignal {
    /// 创建处于 `pending` 状态的信号。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                fired: AtomicBool::new(false),
                waiters: Mutex::new(WaiterSlab::default()),
            }),
        }
    }

    /// 触发信号并唤醒全部等待者。
    ///
    /// 返回 `true` 表示本次调用完成了 `pending -> fired` 迁移；重复调用返回 `false` 且无副作用。
    pub fn fire(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        let wakers = self.inner.waiters.lock().drain();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// 非阻塞地查询是否已触发。
    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// 派生一个新的观测句柄。
    pub fn done(&self) -> Done {
        Done {
            inner: Some(Arc::clone(&self.inner)),
            slot: None,
        }
    }

    /// 当前登记的等待者数量，仅用于诊断与测试。
    pub fn waiter_count(&self) -> usize {
        self.inner.waiters.lock().len()
    }
}

impl Default for DoneSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DoneSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoneSignal")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// 完成信号的观测句柄。
///
/// # 契约说明（What）
/// - 作为 `Future` 在信号触发后返回 `Ready(())`；已触发时首次 `poll` 即就绪；
/// - [`Done::is_fired`] 不消费任何状态，可反复调用；
/// - 克隆出的句柄拥有独立的等待槽位，互不影响；
/// - [`Done::never`] 句柄永不就绪，可安全地放入任何多路等待。
pub struct Done {
    inner: Option<Arc<SignalInner>>,
    slot: Option<usize>,
}

impl Done {
    /// 永不就绪的句柄，用于空根与脱离节点。
    pub const fn never() -> Self {
        Self {
            inner: None,
            slot: None,
        }
    }

    /// 非阻塞地查询信号是否已触发；`never` 句柄恒为 `false`。
    pub fn is_fired(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.fired.load(Ordering::Acquire))
    }

    /// 是否为永不就绪的句柄。
    pub fn is_never(&self) -> bool {
        self.inner.is_none()
    }

    /// 判断两个句柄是否观测同一个信号。
    pub fn same_signal(&self, other: &Done) -> bool {
        match (&self.inner, &other.inner) {
            (Some(left), Some(right)) => Arc::ptr_eq(left, right),
            (None, None) => true,
            _ => false,
        }
    }

    fn release_slot(inner: &SignalInner, slot: &mut Option<usize>) {
        if let Some(index) = slot.take() {
            inner.waiters.lock().remove(index);
        }
    }
}

impl Clone for Done {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            slot: None,
        }
    }
}

impl Future for Done {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let Done { inner, slot } = &mut *self;
        let Some(inner) = inner.as_ref() else {
            return Poll::Pending;
        };

        if inner.fired.load(Ordering::Acquire) {
            Done::release_slot(inner, slot);
            return Poll::Ready(());
        }

        let mut waiters = inner.waiters.lock();
        if inner.fired.load(Ordering::Acquire) {
            if let Some(index) = slot.take() {
                waiters.remove(index);
            }
            return Poll::Ready(());
        }
        match *slot {
            Some(index) => waiters.update(index, cx.waker()),
            None => *slot = Some(waiters.insert(cx.waker().clone())),
        }
        Poll::Pending
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.as_ref() {
            Done::release_slot(inner, &mut self.slot);
        }
    }
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner {
            None => "never",
            Some(inner) if inner.fired.load(Ordering::Acquire) => "fired",
            Some(_) => "pending",
        };
        f.debug_tuple("Done").field(&state).finish()
    }
}
