use std::cell::RefCell;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::trace;

use super::snapshot::{ContextMap, ContextValue};
use super::{ContextScope, ContextSnapshot};

thread_local! {
    static CURRENT: RefCell<Arc<ContextMap>> = RefCell::new(Arc::default());
}

/// Current map of the calling thread. Empty once thread-local storage is
/// being torn down.
fn current() -> Arc<ContextMap> {
    CURRENT
        .try_with(|cell| Arc::clone(&cell.borrow()))
        .unwrap_or_default()
}

/// Replace the calling thread's map and hand back the previous one.
///
/// The caller drops the returned map after the borrow has ended, so value
/// destructors are free to use the context again.
fn swap(next: Arc<ContextMap>) -> Arc<ContextMap> {
    CURRENT
        .try_with(|cell| cell.replace(next))
        .unwrap_or_default()
}

fn update(
    apply: impl FnOnce(&mut ContextMap) -> Option<ContextValue>,
) -> Option<ContextValue> {
    CURRENT
        .try_with(|cell| {
            let mut map = cell.borrow_mut();
            apply(Arc::make_mut(&mut map))
        })
        .ok()
        .flatten()
}

/// Per-thread storage of named context values.
///
/// Every operation acts on the calling thread only. There is no locking and
/// no cross-thread mutation.
pub struct ContextStore;

impl ContextStore {
    /// Read every value currently set on this thread. No side effects.
    pub fn capture() -> ContextSnapshot {
        ContextSnapshot::from_map(current())
    }

    /// Same as [`capture`](Self::capture); named for the "what was here
    /// before" role in a backup/install/restore sequence.
    pub fn backup() -> ContextSnapshot {
        Self::capture()
    }

    /// Total replace: afterwards the thread holds exactly the snapshot's
    /// values, nothing left over from before.
    pub fn install(snapshot: &ContextSnapshot) {
        let previous = swap(Arc::clone(snapshot.map()));
        trace!(installed = snapshot.len(), replaced = previous.len(), "context installed");
        drop(previous);
    }

    /// Return the thread to exactly the state held by `backup`.
    pub fn restore(backup: ContextSnapshot) {
        let previous = swap(backup.into_map());
        trace!(dropped = previous.len(), "context restored");
        drop(previous);
    }

    /// Remove every value and return what was removed.
    pub fn clear() -> ContextSnapshot {
        let removed = ContextSnapshot::from_map(swap(Arc::default()));
        trace!(cleared = removed.len(), "context cleared");
        removed
    }

    /// Run `f` with `snapshot` installed, restoring the previous context on
    /// every exit path (including unwinding).
    pub fn run_with<R>(snapshot: &ContextSnapshot, f: impl FnOnce() -> R) -> R {
        let _scope = ContextScope::enter(snapshot);
        f()
    }

    /// Run `f` with an empty context, restoring afterwards.
    pub fn run_cleared<R>(f: impl FnOnce() -> R) -> R {
        let _scope = ContextScope::cleared();
        f()
    }

    /// Spawn a thread that starts with a copy of the calling thread's
    /// context (inheritable context).
    pub fn spawn_inheriting<F, T>(builder: thread::Builder, f: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let inherited = Self::capture();
        builder.spawn(move || {
            Self::install(&inherited);
            drop(inherited);
            f()
        })
    }
}

/// Typed handle to one named context value.
///
/// ```ignore
/// const TRACE_ID: ContextKey<String> = ContextKey::new("trace_id");
///
/// TRACE_ID.set("abc".to_string());
/// assert_eq!(TRACE_ID.get_cloned().as_deref(), Some("abc"));
/// ```
///
/// The name is the identity of the entry: two keys with the same name
/// address the same slot.
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: Send + Sync + 'static> ContextKey<T> {
    /// Value on the calling thread, if set with this type.
    pub fn get(&self) -> Option<Arc<T>> {
        let value = Arc::clone(current().get(self.name)?);
        value.downcast::<T>().ok()
    }

    pub fn get_cloned(&self) -> Option<T>
    where
        T: Clone,
    {
        self.get().map(|value| T::clone(&value))
    }

    pub fn set(&self, value: T) {
        let previous = update(|map| map.insert(self.name, Arc::new(value)));
        drop(previous);
    }

    /// Returns whether a value was removed.
    pub fn remove(&self) -> bool {
        let previous = update(|map| map.remove(self.name));
        previous.is_some()
    }

    pub fn is_set(&self) -> bool {
        current().contains_key(self.name)
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}
