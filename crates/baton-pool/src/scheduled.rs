//! ScheduledWorkerPool - 遅延実行・周期実行のプール
//!
//! # 構成
//! - timer スレッドが BinaryHeap（最も早い due が先頭）を見張る
//! - due になったエントリを内側の WorkerPool に dispatch
//! - 周期タスクは実行後に次の due で heap に積み直す（公開 API は通らない）
//!
//! decorate は schedule 系メソッドの入口で一度だけ。周期タスクは
//! 同じ snapshot を毎回使います。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use baton_core::instrument::{MethodDescriptor, Modifiers};
use baton_core::{Callable, Runnable, TypeDescriptor, Weavable, Weaving, Weavings};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::PoolError;
use crate::handle::{ScheduledHandle, TaskHandle};
use crate::methods;
use crate::worker_pool::{WorkerPool, WorkerPoolBuilder};

enum Job {
    Once(Box<dyn Runnable>),
    Periodic(Arc<Periodic>),
}

/// Scheduled entry; ordered so that `BinaryHeap` pops the earliest due first.
struct Entry {
    due: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering: earlier due, then earlier submission, first
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

struct Timer {
    name: String,
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

impl Timer {
    fn push(&self, due: Instant, cancelled: Arc<AtomicBool>, job: Job) -> Result<(), PoolError> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(PoolError::Rejected {
                pool: self.name.clone(),
            });
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            due,
            seq,
            cancelled,
            job,
        });
        self.wakeup.notify_one();
        Ok(())
    }

    /// Block until an entry is due; `None` once shut down.
    fn next_due(&self) -> Option<Entry> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            match state.heap.peek().map(|entry| entry.due) {
                None => self.wakeup.wait(&mut state),
                Some(due) if due > Instant::now() => {
                    self.wakeup.wait_until(&mut state, due);
                }
                Some(_) => {
                    if let Some(entry) = state.heap.pop() {
                        return Some(entry);
                    }
                }
            }
        }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        let dropped = state.heap.len();
        state.heap.clear();
        if dropped > 0 {
            debug!(pool = %self.name, dropped, "pending scheduled tasks discarded");
        }
        self.wakeup.notify_all();
    }
}

/// `delay` from now, or a config error when the deadline is not representable.
fn deadline(delay: Duration) -> Result<Instant, PoolError> {
    Instant::now()
        .checked_add(delay)
        .ok_or_else(|| PoolError::Config(format!("delay {delay:?} is out of range")))
}

struct Periodic {
    task: Mutex<Box<dyn Runnable>>,
    period: Duration,
    cancelled: Arc<AtomicBool>,
    timer: Weak<Timer>,
}

impl Periodic {
    fn run(self: &Arc<Self>, due: Instant) {
        if self.cancelled.load(AtomicOrdering::Acquire) {
            return;
        }
        self.task.lock().run();

        if self.cancelled.load(AtomicOrdering::Acquire) {
            return;
        }
        let Some(timer) = self.timer.upgrade() else {
            return;
        };
        let Some(next_due) = due.checked_add(self.period) else {
            warn!(
                pool = %timer.name,
                period = ?self.period,
                "next run out of range, periodic task stopped"
            );
            return;
        };
        let next = Job::Periodic(Arc::clone(self));
        if timer.push(next_due, Arc::clone(&self.cancelled), next).is_err() {
            debug!(pool = %timer.name, "periodic task stopped by shutdown");
        }
    }
}

fn timer_loop(timer: Arc<Timer>, base: Arc<WorkerPool>) {
    while let Some(entry) = timer.next_due() {
        if entry.cancelled.load(AtomicOrdering::Acquire) {
            continue;
        }
        let due = entry.due;
        let task: Box<dyn Runnable> = match entry.job {
            Job::Once(task) => task,
            Job::Periodic(periodic) => Box::new(move || periodic.run(due)),
        };
        if let Err(err) = base.dispatch(task) {
            warn!(pool = %timer.name, error = %err, "scheduled task dropped");
        }
    }
    debug!(pool = %timer.name, "timer exiting");
}

pub struct ScheduledWorkerPool {
    base: Arc<WorkerPool>,
    timer: Arc<Timer>,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
    weaving: Arc<Weaving>,
}

impl ScheduledWorkerPool {
    pub fn builder() -> ScheduledWorkerPoolBuilder {
        ScheduledWorkerPoolBuilder::default()
    }

    /// Run `task` as soon as possible.
    pub fn execute(&self, task: impl Runnable) -> Result<(), PoolError> {
        let task = self.weaving.runnable_arg(&methods::EXECUTE, 0, Box::new(task));
        self.timer
            .push(Instant::now(), ScheduledHandle::default().flag(), Job::Once(task))
    }

    /// Run `task` once after `delay`.
    pub fn schedule(
        &self,
        task: impl Runnable,
        delay: Duration,
    ) -> Result<ScheduledHandle, PoolError> {
        let due = deadline(delay)?;
        let task = self.weaving.runnable_arg(&methods::SCHEDULE, 0, Box::new(task));
        let handle = ScheduledHandle::default();
        self.timer.push(due, handle.flag(), Job::Once(task))?;
        Ok(handle)
    }

    pub fn schedule_callable<T: Send + 'static>(
        &self,
        task: impl Callable<T>,
        delay: Duration,
    ) -> Result<TaskHandle<T>, PoolError> {
        let due = deadline(delay)?;
        let mut task = self
            .weaving
            .callable_arg(&methods::SCHEDULE_CALLABLE, 0, Box::new(task));
        let (tx, rx) = mpsc::sync_channel(1);
        let job = Job::Once(Box::new(move || {
            let _ = tx.send(task.call());
        }));
        self.timer.push(due, ScheduledHandle::default().flag(), job)?;
        Ok(TaskHandle::new(rx))
    }

    /// Run `task` after `initial_delay`, then every `period` until cancelled,
    /// shut down, or the task panics. Runs never overlap.
    pub fn schedule_at_fixed_rate(
        &self,
        task: impl Runnable,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle, PoolError> {
        if period.is_zero() {
            return Err(PoolError::Config("period must be positive".to_string()));
        }
        let due = deadline(initial_delay)?;
        let task = self
            .weaving
            .runnable_arg(&methods::SCHEDULE_AT_FIXED_RATE, 0, Box::new(task));
        let handle = ScheduledHandle::default();
        let periodic = Arc::new(Periodic {
            task: Mutex::new(task),
            period,
            cancelled: handle.flag(),
            timer: Arc::downgrade(&self.timer),
        });
        self.timer.push(due, handle.flag(), Job::Periodic(periodic))?;
        Ok(handle)
    }

    pub fn submit<T: Send + 'static>(
        &self,
        task: impl Callable<T>,
    ) -> Result<TaskHandle<T>, PoolError> {
        self.base.submit(task)
    }

    pub fn invoke_all<T: Send + 'static>(
        &self,
        tasks: Vec<Box<dyn Callable<T>>>,
    ) -> Result<Vec<T>, PoolError> {
        self.base.invoke_all(tasks)
    }

    /// Discard pending delayed tasks and stop the workers once their queue
    /// is drained.
    pub fn shutdown(&self) {
        self.timer.shutdown();
        self.base.shutdown();
    }

    pub fn shutdown_and_join(&self) {
        self.shutdown();
        if let Some(handle) = self.timer_thread.lock().take() {
            let _ = handle.join();
        }
        self.base.shutdown_and_join();
    }

    pub fn pending(&self) -> usize {
        self.timer.state.lock().heap.len()
    }
}

impl Drop for ScheduledWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Weavable for ScheduledWorkerPool {
    const TYPE: TypeDescriptor = TypeDescriptor::from_static("baton_pool::ScheduledWorkerPool");

    fn declared_methods() -> Vec<MethodDescriptor> {
        vec![
            MethodDescriptor::new(Self::TYPE, methods::EXECUTE, Modifiers::PUBLIC),
            MethodDescriptor::new(Self::TYPE, methods::SCHEDULE, Modifiers::PUBLIC),
            MethodDescriptor::new(Self::TYPE, methods::SCHEDULE_CALLABLE, Modifiers::PUBLIC),
            MethodDescriptor::new(Self::TYPE, methods::SCHEDULE_AT_FIXED_RATE, Modifiers::PUBLIC),
            MethodDescriptor::new(Self::TYPE, methods::SHUTDOWN, Modifiers::PUBLIC),
            MethodDescriptor::new(WorkerPool::TYPE, methods::SUBMIT, Modifiers::PUBLIC),
            MethodDescriptor::new(WorkerPool::TYPE, methods::INVOKE_ALL, Modifiers::PUBLIC),
            MethodDescriptor::new(WorkerPool::TYPE, methods::ADD_WORKER, Modifiers::PRIVATE),
        ]
    }
}

pub struct ScheduledWorkerPoolBuilder {
    name: String,
    pool: WorkerPoolBuilder,
    weaving: Arc<Weaving>,
}

impl Default for ScheduledWorkerPoolBuilder {
    fn default() -> Self {
        Self {
            name: "scheduled".to_string(),
            pool: WorkerPool::builder().name("scheduled"),
            weaving: Weaving::empty(),
        }
    }
}

impl ScheduledWorkerPoolBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.pool = self.pool.name(self.name.clone());
        self
    }

    pub fn core_workers(mut self, n: usize) -> Self {
        self.pool = self.pool.core_workers(n);
        self
    }

    pub fn before_execute(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.pool = self.pool.before_execute(hook);
        self
    }

    /// Weaving of the scheduled type itself; workers keep the base pool's.
    pub fn weaving(mut self, weaving: Arc<Weaving>) -> Self {
        self.weaving = weaving;
        self
    }

    /// Both this type's weaving and the base pool's.
    pub fn weavings(mut self, weavings: &Weavings) -> Self {
        self.pool = self.pool.weavings(weavings);
        self.weaving(weavings.get(&ScheduledWorkerPool::TYPE))
    }

    pub fn build(self) -> Result<ScheduledWorkerPool, PoolError> {
        let base = Arc::new(self.pool.build()?);
        let timer = Arc::new(Timer {
            name: self.name.clone(),
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });

        let timer_thread = {
            let timer = Arc::clone(&timer);
            let base = Arc::clone(&base);
            thread::Builder::new()
                .name(format!("{}-timer", self.name))
                .spawn(move || timer_loop(timer, base))?
        };

        Ok(ScheduledWorkerPool {
            base,
            timer,
            timer_thread: Mutex::new(Some(timer_thread)),
            weaving: self.weaving,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn pool() -> ScheduledWorkerPool {
        ScheduledWorkerPool::builder().core_workers(2).build().unwrap()
    }

    #[test]
    fn entries_pop_earliest_first() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        for (offset, seq) in [(30, 0), (10, 1), (20, 2), (10, 3)] {
            heap.push(Entry {
                due: now + Duration::from_millis(offset),
                seq,
                cancelled: Arc::default(),
                job: Job::Once(Box::new(|| {})),
            });
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![1, 3, 2, 0]);
    }

    #[test]
    fn delayed_callable_runs_after_its_delay() {
        let pool = pool();
        let start = Instant::now();
        let handle = pool
            .schedule_callable(Instant::now, Duration::from_millis(30))
            .unwrap();
        let ran_at = handle.join().unwrap();
        assert!(ran_at.duration_since(start) >= Duration::from_millis(30));
        pool.shutdown_and_join();
    }

    #[test]
    fn fixed_rate_repeats_until_cancelled() {
        let pool = pool();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let counter = Arc::clone(&runs);
        let handle = pool
            .schedule_at_fixed_rate(
                move || {
                    if counter.fetch_add(1, AtomicOrdering::SeqCst) + 1 == 3 {
                        let _ = tx.send(());
                    }
                },
                Duration::ZERO,
                Duration::from_millis(5),
            )
            .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.cancel();
        let after_cancel = runs.load(AtomicOrdering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert!(runs.load(AtomicOrdering::SeqCst) <= after_cancel + 1);
        pool.shutdown_and_join();
    }

    #[test]
    fn cancelled_delayed_task_never_runs() {
        let pool = pool();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = pool
            .schedule(move || flag.store(true, AtomicOrdering::SeqCst), Duration::from_millis(20))
            .unwrap();
        handle.cancel();
        thread::sleep(Duration::from_millis(50));
        assert!(!ran.load(AtomicOrdering::SeqCst));
        pool.shutdown_and_join();
    }

    #[test]
    fn zero_period_is_rejected() {
        let pool = pool();
        let result = pool.schedule_at_fixed_rate(|| {}, Duration::ZERO, Duration::ZERO);
        assert!(matches!(result, Err(PoolError::Config(_))));
        pool.shutdown_and_join();
    }

    #[test]
    fn unrepresentable_delays_are_rejected() {
        let pool = pool();
        assert!(matches!(
            pool.schedule(|| {}, Duration::MAX),
            Err(PoolError::Config(_))
        ));
        assert!(matches!(
            pool.schedule_callable(|| 1, Duration::MAX),
            Err(PoolError::Config(_))
        ));
        assert!(matches!(
            pool.schedule_at_fixed_rate(|| {}, Duration::MAX, Duration::from_millis(5)),
            Err(PoolError::Config(_))
        ));
        assert_eq!(pool.pending(), 0);
        pool.shutdown_and_join();
    }

    #[test]
    fn periodic_task_stops_when_its_next_run_is_out_of_range() {
        let pool = pool();
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        let counter = Arc::clone(&runs);
        pool.schedule_at_fixed_rate(
            move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
                let _ = tx.send(());
            },
            Duration::ZERO,
            Duration::MAX,
        )
        .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(runs.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.submit(|| "alive").unwrap().join().unwrap(), "alive");
        pool.shutdown_and_join();
    }

    #[test]
    fn shutdown_discards_pending_and_rejects_new() {
        let pool = pool();
        pool.schedule(|| {}, Duration::from_secs(60)).unwrap();
        assert_eq!(pool.pending(), 1);
        pool.shutdown_and_join();
        assert_eq!(pool.pending(), 0);
        assert!(matches!(pool.execute(|| {}), Err(PoolError::Rejected { .. })));
    }
}
