//! 生产时钟：单线程最小堆计时器驱动。
//!
//! # 设计动机（Why）
//! - 截止节点的计时器可能长达数小时且常被提前停止，为每个计时器启动线程并阻塞睡眠既浪费又无法打断；
//! - 以一个后台线程维护按截止点排序的最小堆，`Condvar::wait_until` 等待最近的截止点，
//!   新登记的计时器通过条件变量唤醒驱动线程重新计算等待时长。
//!
//! # 契约说明（What）
//! - 驱动线程在首次 `arm` 时惰性启动，线程名来自 [`crate::RuntimeSettings`]；
//! - 回调在释放驱动锁之后执行，回调内部可以再次登记或停止计时器；
//! - 最后一个 [`SystemClock`] 克隆被丢弃且没有待触发计时器时，驱动线程退出。

use core::cmp::Reverse;
use core::fmt;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::clock::{Clock, TimerCallback, TimerHandle};

/// 默认驱动线程名。
pub const DEFAULT_TIMER_THREAD_NAME: &str = "spark-context-timer";

/// 堆中过期条目占比过高时触发压缩的最小规模。
const COMPACT_THRESHOLD: usize = 64;

/// 基于系统单调时钟与后台驱动线程的生产时钟。
#[derive(Clone)]
pub struct SystemClock {
    driver: Arc<DriverHandle>,
}

impl SystemClock {
    /// 使用默认线程名构造。
    pub fn new() -> Self {
        Self::with_thread_name(DEFAULT_TIMER_THREAD_NAME)
    }

    /// 指定驱动线程名构造。
    pub fn with_thread_name(name: impl Into<String>) -> Self {
        Self {
            driver: Arc::new(DriverHandle {
                shared: Arc::new(DriverShared {
                    state: Mutex::new(DriverState::default()),
                    wakeup: Condvar::new(),
                }),
                thread_name: name.into(),
            }),
        }
    }

    /// 尚未触发且未停止的计时器数量。
    pub fn pending_timers(&self) -> usize {
        self.driver.shared.state.lock().callbacks.len()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SystemClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemClock")
            .field("thread_name", &self.driver.thread_name)
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn arm(&self, after: Duration, callback: TimerCallback) -> TimerHandle {
        let Some(deadline) = Instant::now().checked_add(after) else {
            tracing::trace!(?after, "timer beyond representable range, never fires");
            return TimerHandle::inert();
        };

        let shared = &self.driver.shared;
        let mut state = shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.queue.push(Reverse((deadline, id)));
        state.callbacks.insert(id, callback);
        if !state.started {
            self.driver.start(&mut state);
        }
        drop(state);
        shared.wakeup.notify_one();

        let shared = Arc::clone(shared);
        TimerHandle::from_fn(move || shared.stop(id))
    }
}

struct DriverHandle {
    shared: Arc<DriverShared>,
    thread_name: String,
}

impl DriverHandle {
    fn start(&self, state: &mut MutexGuard<'_, DriverState>) {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || shared.run());
        match spawned {
            Ok(_) => state.started = true,
            Err(error) => {
                tracing::error!(%error, thread = %self.thread_name, "failed to start timer driver");
            }
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_one();
    }
}

struct DriverShared {
    state: Mutex<DriverState>,
    wakeup: Condvar,
}

#[derive(Default)]
struct DriverState {
    queue: BinaryHeap<Reverse<(Instant, u64)>>,
    callbacks: HashMap<u64, TimerCallback>,
    next_id: u64,
    started: bool,
    shutdown: bool,
}

impl DriverShared {
    fn stop(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let removed = state.callbacks.remove(&id).is_some();
        if state.queue.len() > COMPACT_THRESHOLD && state.queue.len() > 2 * state.callbacks.len() {
            let DriverState {
                queue, callbacks, ..
            } = &mut *state;
            queue.retain(|Reverse((_, id))| callbacks.contains_key(id));
        }
        removed
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown && state.callbacks.is_empty() {
                break;
            }

            let now = Instant::now();
            let mut due = Vec::new();
            while let Some(&Reverse((at, id))) = state.queue.peek() {
                if at > now {
                    break;
                }
                state.queue.pop();
                if let Some(callback) = state.callbacks.remove(&id) {
                    due.push(callback);
                }
            }

            if !due.is_empty() {
                MutexGuard::unlocked(&mut state, || {
                    for callback in due {
                        callback();
                    }
                });
                continue;
            }

            match state.queue.peek() {
                Some(&Reverse((at, _))) => {
                    self.wakeup.wait_until(&mut state, at);
                }
                None => self.wakeup.wait(&mut state),
            }
        }
        tracing::trace!("timer driver exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_in_deadline_order() {
        let clock = SystemClock::with_thread_name("spark-context-timer-test");
        let (tx, rx) = mpsc::channel();
        let slow = tx.clone();
        let _b = clock.arm(
            Duration::from_millis(40),
            Box::new(move || slow.send("slow").expect("receiver alive")),
        );
        let _a = clock.arm(
            Duration::from_millis(5),
            Box::new(move || tx.send("fast").expect("receiver alive")),
        );

        let first = rx.recv_timeout(Duration::from_secs(5)).expect("fast fires");
        let second = rx.recv_timeout(Duration::from_secs(5)).expect("slow fires");
        assert_eq!((first, second), ("fast", "slow"));
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn stop_prevents_callback() {
        let clock = SystemClock::new();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = clock.arm(
            Duration::from_millis(30),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(handle.stop());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn long_timers_stopped_early_are_compacted() {
        let clock = SystemClock::new();
        let handles: Vec<_> = (0..(COMPACT_THRESHOLD * 3))
            .map(|_| clock.arm(Duration::from_secs(3600), Box::new(|| {})))
            .collect();
        for handle in handles {
            assert!(handle.stop());
        }
        let state = clock.driver.shared.state.lock();
        assert!(state.callbacks.is_empty());
        assert!(state.queue.len() <= COMPACT_THRESHOLD + 1);
    }
}
