use std::marker::PhantomData;

use super::{ContextSnapshot, ContextStore};

/// Guard that keeps a context installed for as long as it lives.
///
/// Acquiring backs up the thread's context; dropping restores it, also while
/// unwinding. Scopes on one thread must be dropped in reverse order of
/// creation, which ordinary lexical scoping gives you for free.
///
/// The guard is `!Send`: it restores on the thread that created it.
#[must_use = "dropping the scope restores the previous context immediately"]
pub struct ContextScope {
    backup: Option<ContextSnapshot>,
    _not_send: PhantomData<*const ()>,
}

impl ContextScope {
    /// Back up the current context, then install `snapshot`.
    pub fn enter(snapshot: &ContextSnapshot) -> Self {
        let backup = ContextStore::backup();
        ContextStore::install(snapshot);
        Self::holding(backup)
    }

    /// Clear the current context; it comes back when the scope ends.
    pub fn cleared() -> Self {
        Self::holding(ContextStore::clear())
    }

    fn holding(backup: ContextSnapshot) -> Self {
        Self {
            backup: Some(backup),
            _not_send: PhantomData,
        }
    }

    /// What the thread held before this scope.
    pub fn backup(&self) -> Option<&ContextSnapshot> {
        self.backup.as_ref()
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        if let Some(backup) = self.backup.take() {
            ContextStore::restore(backup);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextKey;

    const USER: ContextKey<&'static str> = ContextKey::new("scope.user");

    #[test]
    fn scopes_nest_in_lifo_order() {
        ContextStore::clear();
        USER.set("root");
        let root = ContextStore::capture();

        USER.set("alice");
        let alice = ContextStore::capture();
        USER.set("bob");
        let bob = ContextStore::capture();
        ContextStore::restore(root.clone());

        {
            let _outer = ContextScope::enter(&alice);
            assert_eq!(USER.get_cloned(), Some("alice"));
            {
                let _inner = ContextScope::enter(&bob);
                assert_eq!(USER.get_cloned(), Some("bob"));
                {
                    let _clean = ContextScope::cleared();
                    assert_eq!(USER.get_cloned(), None);
                }
                assert_eq!(USER.get_cloned(), Some("bob"));
            }
            assert_eq!(USER.get_cloned(), Some("alice"));
        }
        assert_eq!(ContextStore::capture(), root);
    }

    #[test]
    fn writes_inside_a_scope_are_discarded() {
        ContextStore::clear();
        let before = ContextStore::capture();
        {
            let scope = ContextScope::enter(&ContextSnapshot::empty());
            USER.set("temporary");
            assert_eq!(scope.backup(), Some(&before));
        }
        assert!(!USER.is_set());
    }
}
