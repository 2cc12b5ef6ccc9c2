use tracing::trace;

use super::{Callable, Runnable};
use crate::context::{ContextScope, ContextSnapshot, ContextStore};
use crate::error::BatonError;

/// Take or borrow the snapshot for one run.
///
/// One-shot tasks hand the snapshot over and keep nothing, so a second run
/// finds `None`.
fn snapshot_for_run(
    snapshot: &mut Option<ContextSnapshot>,
    release_after_run: bool,
) -> Result<ContextSnapshot, BatonError> {
    let taken = if release_after_run {
        snapshot.take()
    } else {
        snapshot.clone()
    };
    taken.ok_or(BatonError::SnapshotReleased)
}

/// A [`Runnable`] that runs its inner task under the context captured when
/// it was created.
pub struct DecoratedRunnable {
    task: Box<dyn Runnable>,
    snapshot: Option<ContextSnapshot>,
    release_after_run: bool,
}

impl DecoratedRunnable {
    /// Always wraps, even if `task` is decorated already.
    pub fn new(task: impl Runnable, release_after_run: bool) -> Self {
        Self::wrap(Box::new(task), release_after_run)
    }

    fn wrap(task: Box<dyn Runnable>, release_after_run: bool) -> Self {
        Self {
            task,
            snapshot: Some(ContextStore::capture()),
            release_after_run,
        }
    }

    /// The captured snapshot; `None` once a one-shot task has run.
    pub fn snapshot(&self) -> Option<&ContextSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn release_after_run(&self) -> bool {
        self.release_after_run
    }

    /// Run under the captured context.
    ///
    /// Fails with [`BatonError::SnapshotReleased`] instead of running the
    /// task when a one-shot task is run a second time.
    pub fn try_run(&mut self) -> Result<(), BatonError> {
        let snapshot = snapshot_for_run(&mut self.snapshot, self.release_after_run)?;
        let _scope = ContextScope::enter(&snapshot);
        trace!(entries = snapshot.len(), "running decorated runnable");
        self.task.run();
        Ok(())
    }

    pub fn into_inner(self) -> Box<dyn Runnable> {
        self.task
    }
}

impl Runnable for DecoratedRunnable {
    /// # Panics
    /// When a one-shot task is run again (see [`try_run`](Self::try_run)).
    fn run(&mut self) {
        if let Err(err) = self.try_run() {
            panic!("{err}");
        }
    }

    fn is_decorated(&self) -> bool {
        true
    }
}

/// A [`Callable`] that runs its inner task under the context captured when
/// it was created. The inner result is returned untouched.
pub struct DecoratedCallable<T> {
    task: Box<dyn Callable<T>>,
    snapshot: Option<ContextSnapshot>,
    release_after_run: bool,
}

impl<T: 'static> DecoratedCallable<T> {
    /// Always wraps, even if `task` is decorated already.
    pub fn new(task: impl Callable<T>, release_after_run: bool) -> Self {
        Self::wrap(Box::new(task), release_after_run)
    }

    fn wrap(task: Box<dyn Callable<T>>, release_after_run: bool) -> Self {
        Self {
            task,
            snapshot: Some(ContextStore::capture()),
            release_after_run,
        }
    }

    pub fn snapshot(&self) -> Option<&ContextSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn release_after_run(&self) -> bool {
        self.release_after_run
    }

    pub fn try_call(&mut self) -> Result<T, BatonError> {
        let snapshot = snapshot_for_run(&mut self.snapshot, self.release_after_run)?;
        let _scope = ContextScope::enter(&snapshot);
        trace!(entries = snapshot.len(), "calling decorated callable");
        Ok(self.task.call())
    }

    pub fn into_inner(self) -> Box<dyn Callable<T>> {
        self.task
    }
}

impl<T: 'static> Callable<T> for DecoratedCallable<T> {
    /// # Panics
    /// When a one-shot task is called again (see [`try_call`](Self::try_call)).
    fn call(&mut self) -> T {
        match self.try_call() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    fn is_decorated(&self) -> bool {
        true
    }
}

/// Decorate a runnable with the calling thread's current context.
///
/// With `idempotent` set, an already decorated task is returned as is;
/// otherwise it gets a second, outer decoration.
pub fn decorate_runnable(
    task: Box<dyn Runnable>,
    release_after_run: bool,
    idempotent: bool,
) -> Box<dyn Runnable> {
    if idempotent && task.is_decorated() {
        return task;
    }
    Box::new(DecoratedRunnable::wrap(task, release_after_run))
}

/// Callable counterpart of [`decorate_runnable`].
pub fn decorate_callable<T: 'static>(
    task: Box<dyn Callable<T>>,
    release_after_run: bool,
    idempotent: bool,
) -> Box<dyn Callable<T>> {
    if idempotent && task.is_decorated() {
        return task;
    }
    Box::new(DecoratedCallable::wrap(task, release_after_run))
}

/// Decorate a batch of callables, all with the same snapshot instant.
pub fn decorate_all<T: 'static>(
    tasks: impl IntoIterator<Item = Box<dyn Callable<T>>>,
    release_after_run: bool,
    idempotent: bool,
) -> Vec<Box<dyn Callable<T>>> {
    tasks
        .into_iter()
        .map(|task| decorate_callable(task, release_after_run, idempotent))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::*;
    use crate::context::ContextKey;

    const TRACE_ID: ContextKey<String> = ContextKey::new("decorated.trace_id");

    fn data_ptr<T: ?Sized>(task: &T) -> *const () {
        task as *const T as *const ()
    }

    fn observe(into: &Arc<Mutex<Vec<Option<String>>>>) -> impl Runnable {
        let into = Arc::clone(into);
        move || into.lock().unwrap().push(TRACE_ID.get_cloned())
    }

    #[test]
    fn decorated_task_sees_submitter_context_on_another_thread() {
        ContextStore::clear();
        TRACE_ID.set("abc".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut task = decorate_runnable(Box::new(observe(&seen)), true, true);
        TRACE_ID.remove();

        thread::spawn(move || {
            TRACE_ID.set("worker-leftover".to_string());
            task.run();
            assert_eq!(TRACE_ID.get_cloned().as_deref(), Some("worker-leftover"));
        })
        .join()
        .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Some("abc".to_string())]);
    }

    #[test]
    fn empty_capture_hides_worker_context() {
        ContextStore::clear();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut task = DecoratedRunnable::new(observe(&seen), false);

        TRACE_ID.set("previous-task".to_string());
        task.run();

        assert_eq!(*seen.lock().unwrap(), vec![None]);
        assert_eq!(TRACE_ID.get_cloned().as_deref(), Some("previous-task"));
    }

    #[test]
    fn restores_exactly_after_panic_and_propagates_it() {
        ContextStore::clear();
        TRACE_ID.set("captured".to_string());
        fn explode() {
            TRACE_ID.set("changed-inside".to_string());
            panic!("boom");
        }
        let mut task = DecoratedRunnable::new(explode, false);

        ContextStore::clear();
        TRACE_ID.set("worker".to_string());
        let before = ContextStore::capture();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run()));
        let payload = outcome.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
        assert_eq!(ContextStore::capture(), before);
    }

    #[test]
    fn callable_result_is_returned_unchanged() {
        ContextStore::clear();
        TRACE_ID.set("abc".to_string());
        let mut ok = decorate_callable(
            Box::new(|| -> Result<String, String> {
                TRACE_ID.get_cloned().ok_or_else(|| "missing".into())
            }),
            false,
            true,
        );
        let mut failing = decorate_callable(
            Box::new(|| -> Result<String, String> { Err("upstream down".to_string()) }),
            false,
            true,
        );
        ContextStore::clear();

        assert_eq!(ok.call(), Ok("abc".to_string()));
        assert_eq!(failing.call(), Err("upstream down".to_string()));
        assert!(!TRACE_ID.is_set());
    }

    #[test]
    fn idempotent_decoration_returns_the_same_task() {
        ContextStore::clear();
        TRACE_ID.set("first".to_string());
        let once = decorate_runnable(Box::new(|| {}), false, true);
        let ptr = data_ptr(&*once);

        TRACE_ID.set("second".to_string());
        let twice = decorate_runnable(once, false, true);
        assert_eq!(data_ptr(&*twice), ptr);
    }

    #[test]
    fn non_idempotent_decoration_nests() {
        ContextStore::clear();
        let seen = Arc::new(Mutex::new(Vec::new()));
        TRACE_ID.set("inner".to_string());
        let inner = decorate_runnable(Box::new(observe(&seen)), false, true);

        TRACE_ID.set("outer".to_string());
        let mut outer = decorate_runnable(inner, false, false);
        ContextStore::clear();
        outer.run();

        // the innermost capture wins while the body runs
        assert_eq!(*seen.lock().unwrap(), vec![Some("inner".to_string())]);
        assert!(ContextStore::capture().is_empty());
    }

    #[test]
    fn retained_snapshot_is_reused_on_every_run() {
        ContextStore::clear();
        TRACE_ID.set("periodic".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut task = DecoratedRunnable::new(observe(&seen), false);
        ContextStore::clear();

        for _ in 0..4 {
            task.try_run().unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![Some("periodic".to_string()); 4]);
        assert!(task.snapshot().is_some());
    }

    #[test]
    fn released_snapshot_is_not_supplied_again() {
        ContextStore::clear();
        TRACE_ID.set("once".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut task = DecoratedRunnable::new(observe(&seen), true);

        task.try_run().unwrap();
        assert!(task.snapshot().is_none());
        assert!(matches!(task.try_run(), Err(BatonError::SnapshotReleased)));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    #[should_panic(expected = "released after run")]
    fn released_callable_panics_on_second_call() {
        let mut task = DecoratedCallable::new(|| 1, true);
        assert_eq!(task.call(), 1);
        task.call();
    }

    #[test]
    fn decorate_all_skips_decorated_members() {
        ContextStore::clear();
        TRACE_ID.set("batch".to_string());
        let already = decorate_callable(Box::new(|| TRACE_ID.get_cloned()), false, true);
        let already_ptr = data_ptr(&*already);
        let fresh: Box<dyn Callable<Option<String>>> = Box::new(|| TRACE_ID.get_cloned());

        let mut tasks = decorate_all(vec![already, fresh], false, true);
        assert_eq!(data_ptr(&*tasks[0]), already_ptr);
        assert!(tasks.iter().all(|t| t.is_decorated()));

        ContextStore::clear();
        let results: Vec<_> = tasks.iter_mut().map(|t| t.call()).collect();
        assert_eq!(results, vec![Some("batch".to_string()); 2]);
    }

    #[test]
    fn into_inner_unwraps_the_wrapped_task() {
        let decorated = DecoratedRunnable::new(|| {}, false);
        let inner = decorated.into_inner();
        assert!(!inner.is_decorated());
    }
}
