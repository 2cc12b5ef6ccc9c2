//! DecorationRegistry - submission role と decorator の対応表
//!
//! # 設計
//! - 起動時に一度だけ構築（builder で mutable）
//! - 実行時は immutable（ロック不要）
//! - 文字列のリフレクションではなく TypeDescriptor → DecoratorKind の静的な表

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::BatonError;

/// Name of a type as seen by the instrumentation layer
/// (pool types, parameter types).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TypeDescriptor(Cow<'static, str>);

impl TypeDescriptor {
    pub const RUNNABLE: TypeDescriptor = TypeDescriptor::from_static("Runnable");
    pub const CALLABLE: TypeDescriptor = TypeDescriptor::from_static("Callable");
    pub const BOOL: TypeDescriptor = TypeDescriptor::from_static("bool");
    pub const DURATION: TypeDescriptor = TypeDescriptor::from_static("Duration");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which decorator wraps an argument of a given role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoratorKind {
    Runnable,
    Callable,
}

impl DecoratorKind {
    /// Path of the decorating function, used when rendering injected code.
    pub fn decorator_path(&self) -> &'static str {
        match self {
            DecoratorKind::Runnable => "baton_core::task::decorate_runnable",
            DecoratorKind::Callable => "baton_core::task::decorate_callable",
        }
    }
}

impl fmt::Display for DecoratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoratorKind::Runnable => f.write_str("runnable"),
            DecoratorKind::Callable => f.write_str("callable"),
        }
    }
}

static STANDARD: Lazy<Arc<DecorationRegistry>> = Lazy::new(|| {
    let mut roles = HashMap::new();
    roles.insert(TypeDescriptor::RUNNABLE, DecoratorKind::Runnable);
    roles.insert(TypeDescriptor::CALLABLE, DecoratorKind::Callable);
    Arc::new(DecorationRegistry { roles })
});

/// Registry of submission roles (role type -> decorator kind).
#[derive(Debug, Default)]
pub struct DecorationRegistry {
    roles: HashMap<TypeDescriptor, DecoratorKind>,
}

impl DecorationRegistry {
    /// `Runnable -> runnable decorator`, `Callable -> callable decorator`.
    pub fn standard() -> Arc<DecorationRegistry> {
        Arc::clone(&STANDARD)
    }

    pub fn builder() -> DecorationRegistryBuilder {
        DecorationRegistryBuilder::default()
    }

    /// Exact match only; no subtyping.
    pub fn lookup(&self, role: &TypeDescriptor) -> Option<DecoratorKind> {
        self.roles.get(role).copied()
    }

    pub fn roles(&self) -> impl Iterator<Item = (&TypeDescriptor, DecoratorKind)> {
        self.roles.iter().map(|(role, kind)| (role, *kind))
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Builds a [`DecorationRegistry`]; the result cannot be changed afterwards.
#[derive(Default)]
pub struct DecorationRegistryBuilder {
    roles: HashMap<TypeDescriptor, DecoratorKind>,
}

impl DecorationRegistryBuilder {
    pub fn register(
        mut self,
        role: TypeDescriptor,
        kind: DecoratorKind,
    ) -> Result<Self, BatonError> {
        if self.roles.contains_key(&role) {
            return Err(BatonError::DuplicateRole(role));
        }
        self.roles.insert(role, kind);
        Ok(self)
    }

    pub fn build(self) -> Arc<DecorationRegistry> {
        Arc::new(DecorationRegistry { roles: self.roles })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::runnable(TypeDescriptor::RUNNABLE, Some(DecoratorKind::Runnable))]
    #[case::callable(TypeDescriptor::CALLABLE, Some(DecoratorKind::Callable))]
    #[case::bool(TypeDescriptor::BOOL, None)]
    #[case::callable_collection(TypeDescriptor::from_static("Vec<Callable>"), None)]
    #[case::owned_name(TypeDescriptor::new("Runnable"), Some(DecoratorKind::Runnable))]
    fn standard_lookup(#[case] role: TypeDescriptor, #[case] expected: Option<DecoratorKind>) {
        assert_eq!(DecorationRegistry::standard().lookup(&role), expected);
    }

    #[test]
    fn standard_registry_is_built_once() {
        let a = DecorationRegistry::standard();
        let b = DecorationRegistry::standard();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn duplicate_role_is_rejected() {
        let result = DecorationRegistry::builder()
            .register(TypeDescriptor::RUNNABLE, DecoratorKind::Runnable)
            .unwrap()
            .register(TypeDescriptor::RUNNABLE, DecoratorKind::Callable);
        assert!(matches!(
            result,
            Err(BatonError::DuplicateRole(role)) if role == TypeDescriptor::RUNNABLE
        ));
    }

    #[test]
    fn custom_registry_only_knows_its_roles() {
        let registry = DecorationRegistry::builder()
            .register(TypeDescriptor::from_static("Job"), DecoratorKind::Runnable)
            .unwrap()
            .build();
        assert_eq!(
            registry.lookup(&TypeDescriptor::from_static("Job")),
            Some(DecoratorKind::Runnable)
        );
        assert_eq!(registry.lookup(&TypeDescriptor::RUNNABLE), None);
    }

    #[test]
    fn decorator_paths_render() {
        assert_eq!(
            DecoratorKind::Callable.decorator_path(),
            "baton_core::task::decorate_callable"
        );
        assert_eq!(DecoratorKind::Runnable.to_string(), "runnable");
    }
}
