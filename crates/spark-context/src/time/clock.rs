// 教案级说明：时间源是上下文截止语义唯一的外部依赖。
//
// - **意图 (Why)**：截止节点需要“读取当前时间”与“在指定时长后回调”两项能力；若直接调用系统
//   时钟，超时相关的契约测试将无法在 CI 中稳定复现；
// - **契约 (What)**：[`Clock`] 暴露 `now`/`arm` 两个原语，并以 `arm` 为基础提供 `sleep`；
//   [`MockClock`] 以手动推进的虚拟时间实现同一契约，并统计计时器登记次数；
// - **实现提示 (How)**：生产实现 [`SystemClock`](super::SystemClock) 位于 `driver.rs`，
//   以单个后台线程驱动最小堆。
use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context as TaskContext, Poll};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::signal::{Done, DoneSignal};

/// 计时器到期时执行的回调。
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// 抽象可注入的时钟。
///
/// # 接口约束（What）
/// - `now`：返回单调时间点，必须单调不减；
/// - `arm`：登记一个在 `after` 之后执行的回调，返回可提前停止的 [`TimerHandle`]；
///   回调至多执行一次，且不得在 `arm` 返回前于调用线程上同步执行（`after` 为零时除外）；
/// - `sleep`：基于 `arm` 的默认实现，返回在给定时长后完成的 Future。
///
/// # 使用指引（How）
/// - 推荐通过 `Arc<dyn Clock>` 注入 [`crate::Runtime`]；
/// - 测试场景注入 [`MockClock`] 并调用其 `advance` 推进时间。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前的单调时间点。
    fn now(&self) -> Instant;

    /// 登记一个计时器回调。
    fn arm(&self, after: Duration, callback: TimerCallback) -> TimerHandle;

    /// 返回一个在指定持续时间后完成的睡眠 Future。
    fn sleep(&self, duration: Duration) -> Sleep {
        let signal = DoneSignal::new();
        let done = signal.done();
        let timer = self.arm(
            duration,
            Box::new(move || {
                signal.fire();
            }),
        );
        Sleep {
            done,
            timer: Some(timer),
        }
    }
}

/// 计时器控制句柄。
///
/// 停止是尽力而为的：若回调已在执行或执行完毕，[`TimerHandle::stop`] 返回 `false`。
pub struct TimerHandle {
    stop: Box<dyn FnOnce() -> bool + Send + Sync>,
}

impl TimerHandle {
    /// 以停止逻辑构造句柄，供自定义 [`Clock`] 实现使用。
    pub fn from_fn(stop: impl FnOnce() -> bool + Send + Sync + 'static) -> Self {
        Self {
            stop: Box::new(stop),
        }
    }

    /// 已经执行或无需停止的计时器。
    pub fn inert() -> Self {
        Self::from_fn(|| false)
    }

    /// 停止计时器并释放回调；返回 `true` 表示回调因此不会再执行。
    pub fn stop(self) -> bool {
        (self.stop)()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle").finish_non_exhaustive()
    }
}

/// [`Clock::sleep`] 返回的 Future；提前丢弃时停止底层计时器。
#[derive(Debug)]
pub struct Sleep {
    done: Done,
    timer: Option<TimerHandle>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.done).poll(cx)
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            if !self.done.is_fired() {
                timer.stop();
            }
        }
    }
}

/// 虚拟时钟：通过手动推进时间以在测试中复现确定性的计时器触发序列。
///
/// # 行为概览（How）
/// - 内部维护 `elapsed`（自构造起的偏移量）与待触发的计时器列表；
/// - `advance` 增加偏移量，并按“截止点、登记顺序”依次执行到期回调；
/// - 回调在释放内部锁之后执行，允许回调内部再次登记计时器。
///
/// # 契约说明（What）
/// - `advance` 可以多次调用，偏移量单调增加；
/// - `armed_timers` 统计自构造以来的登记次数（包括已停止的计时器），
///   `pending_timers` 返回尚未触发也未停止的数量。
#[derive(Clone)]
pub struct MockClock {
    inner: Arc<Mutex<MockState>>,
}

struct MockState {
    origin: Instant,
    elapsed: Duration,
    timers: Vec<MockTimer>,
    next_id: u64,
    armed: usize,
}

struct MockTimer {
    id: u64,
    deadline: Duration,
    callback: TimerCallback,
}

impl MockClock {
    /// 创建起始时间为当前系统时间的虚拟时钟。
    pub fn new() -> Self {
        Self::with_start(Instant::now())
    }

    /// 以指定起始时间构造虚拟时钟，便于在测试中固定初始偏移。
    pub fn with_start(origin: Instant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                origin,
                elapsed: Duration::ZERO,
                timers: Vec::new(),
                next_id: 0,
                armed: 0,
            })),
        }
    }

    /// 手动推进虚拟时钟，函数返回前执行全部到期回调。
    pub fn advance(&self, delta: Duration) {
        let due = {
            let mut state = self.inner.lock();
            state.elapsed = state.elapsed.saturating_add(delta);
            let now = state.elapsed;
            let (mut due, pending): (Vec<_>, Vec<_>) = state
                .timers
                .drain(..)
                .partition(|timer| timer.deadline <= now);
            state.timers = pending;
            due.sort_by_key(|timer| (timer.deadline, timer.id));
            due
        };

        for timer in due {
            (timer.callback)();
        }
    }

    /// 返回自起始时间以来的虚拟时间偏移。
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().elapsed
    }

    /// 自构造以来登记过的计时器总数。
    pub fn armed_timers(&self) -> usize {
        self.inner.lock().armed
    }

    /// 尚未触发且未被停止的计时器数量。
    pub fn pending_timers(&self) -> usize {
        self.inner.lock().timers.len()
    }

    fn stop_timer(inner: &Weak<Mutex<MockState>>, id: u64) -> bool {
        let Some(inner) = inner.upgrade() else {
            return false;
        };
        let removed = {
            let mut state = inner.lock();
            state
                .timers
                .iter()
                .position(|timer| timer.id == id)
                .map(|index| state.timers.remove(index))
        };
        removed.is_some()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MockClock")
            .field("elapsed", &state.elapsed)
            .field("pending_timers", &state.timers.len())
            .field("armed_timers", &state.armed)
            .finish()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let state = self.inner.lock();
        state.origin + state.elapsed
    }

    fn arm(&self, after: Duration, callback: TimerCallback) -> TimerHandle {
        let mut state = self.inner.lock();
        state.armed += 1;
        if after.is_zero() {
            drop(state);
            callback();
            return TimerHandle::inert();
        }

        let id = state.next_id;
        state.next_id += 1;
        let deadline = state.elapsed.saturating_add(after);
        state.timers.push(MockTimer {
            id,
            deadline,
            callback,
        });
        drop(state);

        let weak = Arc::downgrade(&self.inner);
        TimerHandle::from_fn(move || MockClock::stop_timer(&weak, id))
    }
}
