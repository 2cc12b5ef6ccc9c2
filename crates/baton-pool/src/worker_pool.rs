//! WorkerPool - 長生きする worker スレッドでタスクを実行するプール
//!
//! # 投入の流れ（dispatch）
//! 1. core worker が足りなければ `add_worker(task, true)` で新しい worker に渡す
//! 2. それ以外はキューに積む
//! 3. キューが満杯なら `add_worker(task, false)`（max まで）→ ダメなら Rejected
//!
//! worker は `add_worker` を呼んだスレッドのコンテキストを引き継いで起動します。
//! Weaving の guard があれば、その時点でコンテキストは空になっています。

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use baton_core::context::ContextStore;
use baton_core::instrument::{MethodDescriptor, Modifiers};
use baton_core::{Callable, Runnable, TypeDescriptor, Weavable, Weaving, Weavings};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::PoolError;
use crate::handle::TaskHandle;
use crate::methods;

type Hook = Arc<dyn Fn() + Send + Sync>;

struct State {
    queue: VecDeque<Box<dyn Runnable>>,
    live: usize,
    spawned: usize,
    handles: Vec<JoinHandle<()>>,
    shutdown: bool,
}

struct Shared {
    name: String,
    core_workers: usize,
    max_workers: usize,
    queue_capacity: Option<usize>,
    keep_alive: Duration,
    before_execute: Option<Hook>,
    state: Mutex<State>,
    available: Condvar,
}

impl Shared {
    /// Next task for a worker; `None` tells the worker to exit.
    fn take(&self, core: bool) -> Option<Box<dyn Runnable>> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.queue.pop_front() {
                return Some(task);
            }
            if state.shutdown {
                state.live -= 1;
                return None;
            }
            if core {
                self.available.wait(&mut state);
            } else if self.available.wait_for(&mut state, self.keep_alive).timed_out()
                && state.queue.is_empty()
            {
                state.live -= 1;
                debug!(pool = %self.name, "idle worker retired");
                return None;
            }
        }
    }

    fn run(&self, task: &mut dyn Runnable) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            if let Some(hook) = &self.before_execute {
                hook();
            }
            task.run();
        }));
        if let Err(payload) = outcome {
            warn!(pool = %self.name, panic = panic_message(payload.as_ref()), "task panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn worker_loop(shared: Arc<Shared>, first_task: Box<dyn Runnable>, core: bool) {
    let mut next = Some(first_task);
    while let Some(mut task) = next.take().or_else(|| shared.take(core)) {
        shared.run(task.as_mut());
    }
    debug!(pool = %shared.name, core, "worker exiting");
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    weaving: Arc<Weaving>,
}

impl WorkerPool {
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Run `task` on a worker.
    pub fn execute(&self, task: impl Runnable) -> Result<(), PoolError> {
        let task = self.weaving.runnable_arg(&methods::EXECUTE, 0, Box::new(task));
        self.dispatch(task)
    }

    /// Run `task` on a worker and hand its result back.
    pub fn submit<T: Send + 'static>(
        &self,
        task: impl Callable<T>,
    ) -> Result<TaskHandle<T>, PoolError> {
        self.submit_boxed(Box::new(task))
    }

    pub(crate) fn submit_boxed<T: Send + 'static>(
        &self,
        task: Box<dyn Callable<T>>,
    ) -> Result<TaskHandle<T>, PoolError> {
        let mut task = self.weaving.callable_arg(&methods::SUBMIT, 0, task);
        let (tx, rx) = mpsc::sync_channel(1);
        self.dispatch(Box::new(move || {
            let _ = tx.send(task.call());
        }))?;
        Ok(TaskHandle::new(rx))
    }

    /// Submit every task, then wait for all results in order.
    pub fn invoke_all<T: Send + 'static>(
        &self,
        tasks: Vec<Box<dyn Callable<T>>>,
    ) -> Result<Vec<T>, PoolError> {
        let handles = tasks
            .into_iter()
            .map(|task| self.submit_boxed(task))
            .collect::<Result<Vec<_>, _>>()?;
        handles.into_iter().map(TaskHandle::join).collect()
    }

    /// Stop accepting tasks. Queued tasks still run.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            state.shutdown = true;
            info!(pool = %self.shared.name, queued = state.queue.len(), "shutting down");
        }
        self.shared.available.notify_all();
    }

    pub fn shutdown_and_join(&self) {
        self.shutdown();
        let handles = std::mem::take(&mut self.shared.state.lock().handles);
        for handle in handles {
            let _ = handle.join();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    pub fn live_workers(&self) -> usize {
        self.shared.state.lock().live
    }

    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Hand an already prepared task to the workers. Does not pass the
    /// `execute` entry.
    pub(crate) fn dispatch(&self, task: Box<dyn Runnable>) -> Result<(), PoolError> {
        let Some(task) = self.add_worker(task, true)? else {
            return Ok(());
        };
        let Some(task) = self.enqueue(task)? else {
            return Ok(());
        };
        match self.add_worker(task, false)? {
            None => Ok(()),
            Some(_) => {
                warn!(pool = %self.shared.name, "queue full, task rejected");
                Err(self.rejected())
            }
        }
    }

    /// Start a worker whose first task is `first_task`. Gives the task back
    /// when the worker limit is reached.
    fn add_worker(
        &self,
        first_task: Box<dyn Runnable>,
        core: bool,
    ) -> Result<Option<Box<dyn Runnable>>, PoolError> {
        let _guard = self.weaving.enter(&methods::ADD_WORKER);

        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(self.rejected());
        }
        let limit = if core {
            self.shared.core_workers
        } else {
            self.shared.max_workers
        };
        if state.live >= limit {
            return Ok(Some(first_task));
        }

        let id = state.spawned;
        let shared = Arc::clone(&self.shared);
        let builder = thread::Builder::new().name(format!("{}-worker-{id}", self.shared.name));
        let handle =
            ContextStore::spawn_inheriting(builder, move || worker_loop(shared, first_task, core))?;
        state.live += 1;
        state.spawned += 1;
        state.handles.push(handle);

        debug!(pool = %self.shared.name, worker = id, core, "worker started");
        Ok(None)
    }

    fn enqueue(&self, task: Box<dyn Runnable>) -> Result<Option<Box<dyn Runnable>>, PoolError> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(self.rejected());
        }
        if self.shared.queue_capacity.is_some_and(|capacity| state.queue.len() >= capacity) {
            return Ok(Some(task));
        }
        state.queue.push_back(task);
        self.shared.available.notify_one();
        Ok(None)
    }

    fn rejected(&self) -> PoolError {
        PoolError::Rejected {
            pool: self.shared.name.clone(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Weavable for WorkerPool {
    const TYPE: TypeDescriptor = TypeDescriptor::from_static("baton_pool::WorkerPool");

    fn declared_methods() -> Vec<MethodDescriptor> {
        vec![
            MethodDescriptor::new(Self::TYPE, methods::EXECUTE, Modifiers::PUBLIC),
            MethodDescriptor::new(Self::TYPE, methods::SUBMIT, Modifiers::PUBLIC),
            MethodDescriptor::new(Self::TYPE, methods::INVOKE_ALL, Modifiers::PUBLIC),
            MethodDescriptor::new(Self::TYPE, methods::SHUTDOWN, Modifiers::PUBLIC),
            MethodDescriptor::new(Self::TYPE, methods::ADD_WORKER, Modifiers::PRIVATE),
        ]
    }
}

pub struct WorkerPoolBuilder {
    name: String,
    core_workers: usize,
    max_workers: Option<usize>,
    queue_capacity: Option<usize>,
    keep_alive: Duration,
    before_execute: Option<Hook>,
    weaving: Arc<Weaving>,
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            core_workers: 1,
            max_workers: None,
            queue_capacity: None,
            keep_alive: Duration::from_secs(60),
            before_execute: None,
            weaving: Weaving::empty(),
        }
    }
}

impl WorkerPoolBuilder {
    /// Prefix of worker thread names.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn core_workers(mut self, n: usize) -> Self {
        self.core_workers = n;
        self
    }

    /// Defaults to `core_workers`.
    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = Some(n);
        self
    }

    /// Unbounded by default.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// How long a non-core worker waits for work before exiting.
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Runs on the worker thread before every task, outside the task's
    /// context.
    pub fn before_execute(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.before_execute = Some(Arc::new(hook));
        self
    }

    pub fn weaving(mut self, weaving: Arc<Weaving>) -> Self {
        self.weaving = weaving;
        self
    }

    /// Take this type's weaving out of a prepared set.
    pub fn weavings(self, weavings: &Weavings) -> Self {
        self.weaving(weavings.get(&WorkerPool::TYPE))
    }

    pub fn build(self) -> Result<WorkerPool, PoolError> {
        let max_workers = self.max_workers.unwrap_or(self.core_workers);
        if self.core_workers == 0 {
            return Err(PoolError::Config("core_workers must be at least 1".to_string()));
        }
        if max_workers < self.core_workers {
            return Err(PoolError::Config(format!(
                "max_workers ({max_workers}) is below core_workers ({})",
                self.core_workers
            )));
        }

        Ok(WorkerPool {
            shared: Arc::new(Shared {
                name: self.name,
                core_workers: self.core_workers,
                max_workers,
                queue_capacity: self.queue_capacity,
                keep_alive: self.keep_alive,
                before_execute: self.before_execute,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    live: 0,
                    spawned: 0,
                    handles: Vec::new(),
                    shutdown: false,
                }),
                available: Condvar::new(),
            }),
            weaving: self.weaving,
        })
    }
}
