//! InterceptionLayer - プロセス内で動く CodeInjector
//!
//! バイトコードを書き換える代わりに、プール型は自分のメソッド表を
//! [`Weavable`] として公開し、各メソッドの入口で [`Weaving`] を呼びます。
//!
//! # フロー
//! 1. `register::<Pool>()` でメソッド表を登録
//! 2. ExecutorTransformer が plan → `inject(site)` → `emit(target)`
//! 3. emit の結果 `Arc<Weaving>` をプールに渡す
//! 4. プールは入口で `runnable_arg` / `callable_arg` / `enter` を呼ぶ
//!
//! site が無いメソッドでは Weaving は何もしません（素通し）。

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::context::ContextScope;
use crate::error::{BatonError, InjectionError};
use crate::instrument::{
    Advice, ExecutorTransformer, InstrumentationSite, MethodDescriptor, MethodSignature,
};
use crate::ports::CodeInjector;
use crate::registry::{DecorationRegistry, DecoratorKind, TypeDescriptor};
use crate::task::{Callable, Runnable, decorate_callable, decorate_runnable};

/// A pool type that exposes its method table to the interception layer.
pub trait Weavable {
    /// Unique name of the type.
    const TYPE: TypeDescriptor;

    /// Own methods plus inherited ones, each tagged with its declaring type.
    fn declared_methods() -> Vec<MethodDescriptor>;
}

struct Registered {
    methods: Vec<MethodDescriptor>,
    sites: Vec<InstrumentationSite>,
    emitted: bool,
}

pub struct InterceptionLayer {
    registry: Arc<DecorationRegistry>,
    types: HashMap<TypeDescriptor, Registered>,
}

impl InterceptionLayer {
    pub fn new() -> Self {
        Self::with_registry(DecorationRegistry::standard())
    }

    /// `registry` decides which parameter types accept which decorator.
    pub fn with_registry(registry: Arc<DecorationRegistry>) -> Self {
        Self {
            registry,
            types: HashMap::new(),
        }
    }

    pub fn register<W: Weavable>(&mut self) -> &mut Self {
        self.register_type(W::TYPE, W::declared_methods())
    }

    /// Register a type by hand. Registering the same type again replaces its
    /// table and forgets injected sites.
    pub fn register_type(
        &mut self,
        target: TypeDescriptor,
        methods: Vec<MethodDescriptor>,
    ) -> &mut Self {
        self.types.insert(
            target,
            Registered {
                methods,
                sites: Vec::new(),
                emitted: false,
            },
        );
        self
    }

    /// Run `transformer` over every registered type.
    ///
    /// Stops at the first failure; types it does not support get no entry.
    pub fn prepare_all(
        &mut self,
        transformer: &ExecutorTransformer,
    ) -> Result<Weavings, BatonError> {
        let mut targets: Vec<TypeDescriptor> = self.types.keys().cloned().collect();
        targets.sort();

        let mut weavings = HashMap::new();
        for target in targets {
            if let Some(weaving) = transformer.transform(&target, self)? {
                weavings.insert(target, weaving);
            }
        }
        Ok(Weavings { by_type: weavings })
    }

    fn validate(
        &self,
        registered: &Registered,
        site: &InstrumentationSite,
    ) -> Result<(), InjectionError> {
        let method = registered
            .methods
            .iter()
            .find(|m| m.declaring_type == site.target && m.signature == site.method)
            .ok_or_else(|| InjectionError::NoSuchMethod {
                target: site.target.clone(),
                method: site.method.clone(),
            })?;

        for advice in &site.before {
            let Advice::DecorateArgument { index, kind, .. } = advice else {
                continue;
            };
            let param = method
                .signature
                .params()
                .get(*index)
                .ok_or_else(|| InjectionError::ArgumentOutOfRange {
                    method: site.method.clone(),
                    index: *index,
                })?;
            if self.registry.lookup(param) != Some(*kind) {
                return Err(InjectionError::ArgumentKindMismatch {
                    method: site.method.clone(),
                    index: *index,
                    found: param.clone(),
                    kind: *kind,
                });
            }
        }
        Ok(())
    }
}

impl Default for InterceptionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeInjector for InterceptionLayer {
    type Prepared = Arc<Weaving>;

    fn declared_methods(
        &self,
        target: &TypeDescriptor,
    ) -> Result<Vec<MethodDescriptor>, InjectionError> {
        self.types
            .get(target)
            .map(|registered| registered.methods.clone())
            .ok_or_else(|| InjectionError::UnknownType(target.clone()))
    }

    fn inject(&mut self, site: &InstrumentationSite) -> Result<(), InjectionError> {
        let registered = self
            .types
            .get(&site.target)
            .ok_or_else(|| InjectionError::UnknownType(site.target.clone()))?;
        if registered.emitted {
            return Err(InjectionError::AlreadyEmitted(site.target.clone()));
        }
        self.validate(registered, site)?;

        if let Some(registered) = self.types.get_mut(&site.target) {
            registered.sites.push(site.clone());
        }
        Ok(())
    }

    fn emit(&mut self, target: &TypeDescriptor) -> Result<Arc<Weaving>, InjectionError> {
        let registered = self
            .types
            .get_mut(target)
            .ok_or_else(|| InjectionError::UnknownType(target.clone()))?;
        if registered.emitted {
            return Err(InjectionError::AlreadyEmitted(target.clone()));
        }
        registered.emitted = true;

        let sites = registered
            .sites
            .iter()
            .map(|site| (site.method.clone(), site.clone()))
            .collect();
        debug!(target_type = %target, sites = registered.sites.len(), "weaving emitted");
        Ok(Arc::new(Weaving {
            target: Some(target.clone()),
            sites,
        }))
    }
}

/// The injected code of one pool type, applied at method entry.
#[derive(Debug, Default)]
pub struct Weaving {
    target: Option<TypeDescriptor>,
    sites: HashMap<MethodSignature, InstrumentationSite>,
}

static EMPTY: Lazy<Arc<Weaving>> = Lazy::new(|| Arc::new(Weaving::default()));

impl Weaving {
    /// A weaving that changes nothing.
    pub fn empty() -> Arc<Weaving> {
        Arc::clone(&EMPTY)
    }

    /// `None` for [`Weaving::empty`].
    pub fn target(&self) -> Option<&TypeDescriptor> {
        self.target.as_ref()
    }

    pub fn site(&self, method: &MethodSignature) -> Option<&InstrumentationSite> {
        self.sites.get(method)
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Argument `index` of `method` after the injected decoration, if any.
    pub fn runnable_arg(
        &self,
        method: &MethodSignature,
        index: usize,
        task: Box<dyn Runnable>,
    ) -> Box<dyn Runnable> {
        match self.decoration(method, index, DecoratorKind::Runnable) {
            Some((release_after_run, idempotent)) => {
                decorate_runnable(task, release_after_run, idempotent)
            }
            None => task,
        }
    }

    pub fn callable_arg<T: 'static>(
        &self,
        method: &MethodSignature,
        index: usize,
        task: Box<dyn Callable<T>>,
    ) -> Box<dyn Callable<T>> {
        match self.decoration(method, index, DecoratorKind::Callable) {
            Some((release_after_run, idempotent)) => {
                decorate_callable(task, release_after_run, idempotent)
            }
            None => task,
        }
    }

    /// Enter `method`'s body. Guarded methods clear the thread's context
    /// until the returned scope is dropped, on return or unwind alike.
    pub fn enter(&self, method: &MethodSignature) -> Option<ContextScope> {
        if self.is_guarded(method) {
            Some(ContextScope::cleared())
        } else {
            None
        }
    }

    pub fn is_guarded(&self, method: &MethodSignature) -> bool {
        self.sites.get(method).is_some_and(InstrumentationSite::is_guard)
    }

    fn decoration(
        &self,
        method: &MethodSignature,
        index: usize,
        expected: DecoratorKind,
    ) -> Option<(bool, bool)> {
        self.sites.get(method)?.before.iter().find_map(|advice| match advice {
            Advice::DecorateArgument {
                index: at,
                kind,
                release_after_run,
                idempotent,
            } if *at == index && *kind == expected => Some((*release_after_run, *idempotent)),
            _ => None,
        })
    }
}

/// Weavings of every prepared type.
#[derive(Debug, Default, Clone)]
pub struct Weavings {
    by_type: HashMap<TypeDescriptor, Arc<Weaving>>,
}

impl Weavings {
    /// The weaving of `target`, or [`Weaving::empty`] if it was not prepared.
    pub fn get(&self, target: &TypeDescriptor) -> Arc<Weaving> {
        self.by_type.get(target).cloned().unwrap_or_else(Weaving::empty)
    }

    pub fn contains(&self, target: &TypeDescriptor) -> bool {
        self.by_type.contains_key(target)
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::context::{ContextKey, ContextStore};
    use crate::instrument::{FailurePolicy, Modifiers, SupportedPool};

    const USER: ContextKey<String> = ContextKey::new("interception.user");

    const EXECUTE_PARAMS: &[TypeDescriptor] = &[TypeDescriptor::RUNNABLE];
    const SUBMIT_PARAMS: &[TypeDescriptor] = &[TypeDescriptor::CALLABLE];
    const ADD_WORKER_PARAMS: &[TypeDescriptor] = &[TypeDescriptor::RUNNABLE, TypeDescriptor::BOOL];

    const EXECUTE: MethodSignature = MethodSignature::from_static("execute", EXECUTE_PARAMS);
    const SUBMIT: MethodSignature = MethodSignature::from_static("submit", SUBMIT_PARAMS);
    const ADD_WORKER: MethodSignature =
        MethodSignature::from_static("add_worker", ADD_WORKER_PARAMS);

    struct FakePool;

    impl Weavable for FakePool {
        const TYPE: TypeDescriptor = TypeDescriptor::from_static("test::FakePool");

        fn declared_methods() -> Vec<MethodDescriptor> {
            vec![
                MethodDescriptor::new(Self::TYPE, EXECUTE, Modifiers::PUBLIC),
                MethodDescriptor::new(Self::TYPE, SUBMIT, Modifiers::PUBLIC),
                MethodDescriptor::new(Self::TYPE, ADD_WORKER, Modifiers::PRIVATE),
            ]
        }
    }

    fn prepared() -> Arc<Weaving> {
        let transformer = ExecutorTransformer::builder()
            .support(SupportedPool::basic(FakePool::TYPE))
            .build()
            .unwrap();
        let mut layer = InterceptionLayer::new();
        layer.register::<FakePool>();
        layer.prepare_all(&transformer).unwrap().get(&FakePool::TYPE)
    }

    fn site(before: Vec<Advice>) -> InstrumentationSite {
        InstrumentationSite {
            target: FakePool::TYPE,
            method: EXECUTE,
            before,
            after: Vec::new(),
            failure: FailurePolicy::Propagate,
        }
    }

    #[test]
    fn execute_argument_carries_the_submitting_context() {
        ContextStore::clear();
        let weaving = prepared();
        let seen = Arc::new(Mutex::new(None));

        USER.set("alice".to_string());
        let sink = Arc::clone(&seen);
        let mut task = weaving.runnable_arg(
            &EXECUTE,
            0,
            Box::new(move || *sink.lock().unwrap() = USER.get_cloned()),
        );
        USER.set("bob".to_string());

        assert!(task.is_decorated());
        std::thread::spawn(move || task.run()).join().unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("alice"));
        ContextStore::clear();
    }

    #[test]
    fn submit_argument_is_decorated_as_callable() {
        let weaving = prepared();
        let task = weaving.callable_arg(&SUBMIT, 0, Box::new(|| 7));
        assert!(task.is_decorated());
    }

    #[test]
    fn methods_without_a_site_pass_through() {
        let weaving = prepared();
        let task = weaving.runnable_arg(&ADD_WORKER, 0, Box::new(|| {}));
        assert!(!task.is_decorated());

        let empty = Weaving::empty();
        assert!(!empty.runnable_arg(&EXECUTE, 0, Box::new(|| {})).is_decorated());
        assert!(empty.enter(&ADD_WORKER).is_none());
    }

    #[test]
    fn guarded_entry_clears_then_restores() {
        ContextStore::clear();
        let weaving = prepared();
        assert!(weaving.is_guarded(&ADD_WORKER));
        assert!(!weaving.is_guarded(&EXECUTE));

        USER.set("carol".to_string());
        {
            let _guard = weaving.enter(&ADD_WORKER);
            assert!(ContextStore::capture().is_empty());
        }
        assert_eq!(USER.get_cloned().as_deref(), Some("carol"));
        ContextStore::clear();
    }

    #[test]
    fn unknown_type_is_reported() {
        let layer = InterceptionLayer::new();
        let err = layer.declared_methods(&FakePool::TYPE).unwrap_err();
        assert_eq!(err, InjectionError::UnknownType(FakePool::TYPE));
    }

    #[test]
    fn sites_are_checked_against_the_method_table() {
        let mut layer = InterceptionLayer::new();
        layer.register::<FakePool>();

        let out_of_range = site(vec![Advice::DecorateArgument {
            index: 1,
            kind: DecoratorKind::Runnable,
            release_after_run: false,
            idempotent: true,
        }]);
        assert!(matches!(
            layer.inject(&out_of_range),
            Err(InjectionError::ArgumentOutOfRange { index: 1, .. })
        ));

        let wrong_kind = site(vec![Advice::DecorateArgument {
            index: 0,
            kind: DecoratorKind::Callable,
            release_after_run: false,
            idempotent: true,
        }]);
        assert!(matches!(
            layer.inject(&wrong_kind),
            Err(InjectionError::ArgumentKindMismatch { .. })
        ));

        let mut missing = site(Vec::new());
        missing.method = MethodSignature::from_static("shutdown", &[]);
        assert!(matches!(layer.inject(&missing), Err(InjectionError::NoSuchMethod { .. })));
    }

    #[test]
    fn emitted_type_is_sealed() {
        let mut layer = InterceptionLayer::new();
        layer.register::<FakePool>();
        layer.emit(&FakePool::TYPE).unwrap();

        assert_eq!(
            layer.inject(&site(Vec::new())),
            Err(InjectionError::AlreadyEmitted(FakePool::TYPE))
        );
        assert!(matches!(layer.emit(&FakePool::TYPE), Err(InjectionError::AlreadyEmitted(_))));
    }

    #[test]
    fn unsupported_types_get_the_empty_weaving() {
        let transformer = ExecutorTransformer::builder().build().unwrap();
        let mut layer = InterceptionLayer::new();
        layer.register::<FakePool>();

        let weavings = layer.prepare_all(&transformer).unwrap();
        assert!(weavings.is_empty());
        assert!(weavings.get(&FakePool::TYPE).target().is_none());
    }
}
