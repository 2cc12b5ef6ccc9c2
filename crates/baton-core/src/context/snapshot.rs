use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::ContextKey;

pub(crate) type ContextValue = Arc<dyn Any + Send + Sync>;
pub(crate) type ContextMap = HashMap<&'static str, ContextValue>;

/// All context values of one thread, taken at one instant.
///
/// Snapshots share their map with the thread they were taken from; the
/// thread copies the map before its next write, so a snapshot never changes.
#[derive(Clone, Default)]
pub struct ContextSnapshot {
    entries: Arc<ContextMap>,
}

impl ContextSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(entries: Arc<ContextMap>) -> Self {
        Self { entries }
    }

    pub(crate) fn map(&self) -> &Arc<ContextMap> {
        &self.entries
    }

    pub(crate) fn into_map(self) -> Arc<ContextMap> {
        self.entries
    }

    /// Typed lookup. Returns `None` when the key is absent or bound to a
    /// value of another type.
    pub fn get<T: Send + Sync + 'static>(&self, key: &ContextKey<T>) -> Option<Arc<T>> {
        let value = Arc::clone(self.entries.get(key.name())?);
        value.downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Two snapshots are equal when they bind the same names to the very same
/// value allocations.
impl PartialEq for ContextSnapshot {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.entries, &other.entries) {
            return true;
        }
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(name, value)| {
                other
                    .entries
                    .get(name)
                    .is_some_and(|theirs| Arc::ptr_eq(value, theirs))
            })
    }
}

impl Eq for ContextSnapshot {}

impl fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("ContextSnapshot").field("keys", &keys).finish()
    }
}
