//! ExecutorTransformer - サポート対象のプール型ごとに plan → inject → emit
//!
//! # Fail-fast 設計
//! - plan を最後まで計算してから inject を始める
//! - 構造ミスマッチは inject 前に BatonError として返る（部分的な注入はしない）
//! - サポート外の型は `Ok(None)`（触らない）

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::{InstrumentationPlan, InstrumentationSite, PoolMethodRewriter, WorkerLifecycleGuard};
use crate::config::BatonConfig;
use crate::error::BatonError;
use crate::ports::CodeInjector;
use crate::registry::{DecorationRegistry, TypeDescriptor};

/// A pool type the transformer knows how to instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedPool {
    pub descriptor: TypeDescriptor,
    /// Whether the type declares its own worker entry point.
    pub has_worker_entry: bool,
}

impl SupportedPool {
    /// A pool that owns persistent workers and declares the entry point.
    pub fn basic(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            has_worker_entry: true,
        }
    }

    /// A variant that inherits the worker machinery from a basic pool.
    pub fn scheduled(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            has_worker_entry: false,
        }
    }
}

pub struct ExecutorTransformer {
    rewriter: PoolMethodRewriter,
    guard: WorkerLifecycleGuard,
    pools: HashMap<TypeDescriptor, SupportedPool>,
    config: BatonConfig,
}

impl ExecutorTransformer {
    pub fn builder() -> ExecutorTransformerBuilder {
        ExecutorTransformerBuilder::default()
    }

    pub fn config(&self) -> &BatonConfig {
        &self.config
    }

    pub fn supports(&self, target: &TypeDescriptor) -> bool {
        self.pools.contains_key(target)
    }

    pub fn supported_types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.pools.keys()
    }

    /// Every site for `target`, or `None` if the type is not supported.
    pub fn plan<I>(
        &self,
        target: &TypeDescriptor,
        injector: &I,
    ) -> Result<Option<InstrumentationPlan>, BatonError>
    where
        I: CodeInjector + ?Sized,
    {
        let Some(pool) = self.pools.get(target) else {
            return Ok(None);
        };

        let methods = injector.declared_methods(target)?;
        let mut sites = self.rewriter.plan(target, &methods);
        if pool.has_worker_entry && self.config.worker_guard {
            sites.push(self.guard.plan(target, &methods)?);
        }

        Ok(Some(InstrumentationPlan {
            target: target.clone(),
            sites,
        }))
    }

    /// Plan, inject every site, and emit the prepared type.
    ///
    /// Nothing is injected unless planning succeeded for the whole type.
    pub fn transform<I>(
        &self,
        target: &TypeDescriptor,
        injector: &mut I,
    ) -> Result<Option<I::Prepared>, BatonError>
    where
        I: CodeInjector + ?Sized,
    {
        let Some(plan) = self.plan(target, &*injector)? else {
            return Ok(None);
        };

        for site in &plan.sites {
            self.record(site);
            injector.inject(site)?;
        }
        let prepared = injector.emit(target)?;

        info!(target_type = %target, sites = plan.sites.len(), "pool type prepared");
        Ok(Some(prepared))
    }

    fn record(&self, site: &InstrumentationSite) {
        let before = site.render_before();
        let after = site.render_after();
        if self.config.audit {
            info!(
                target_type = %site.target,
                method = %site.method,
                code = %before,
                finally = %after,
                "insert code"
            );
        } else {
            debug!(
                target_type = %site.target,
                method = %site.method,
                code = %before,
                finally = %after,
                "insert code"
            );
        }
    }
}

/// Builds an [`ExecutorTransformer`].
///
/// ```ignore
/// let transformer = ExecutorTransformer::builder()
///     .support(SupportedPool::basic(WorkerPool::TYPE))
///     .support(SupportedPool::scheduled(ScheduledWorkerPool::TYPE))
///     .config(BatonConfig::from_agent_args("audit=false")?)
///     .build()?;
/// ```
#[derive(Default)]
pub struct ExecutorTransformerBuilder {
    registry: Option<Arc<DecorationRegistry>>,
    guard: Option<WorkerLifecycleGuard>,
    pools: Vec<SupportedPool>,
    config: BatonConfig,
}

impl ExecutorTransformerBuilder {
    /// Defaults to [`DecorationRegistry::standard`].
    pub fn registry(mut self, registry: Arc<DecorationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Defaults to `add_worker(Runnable, bool)` with the `add_thread(Runnable)`
    /// fallback.
    pub fn guard(mut self, guard: WorkerLifecycleGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn support(mut self, pool: SupportedPool) -> Self {
        self.pools.push(pool);
        self
    }

    pub fn config(mut self, config: BatonConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ExecutorTransformer, BatonError> {
        let mut pools = HashMap::with_capacity(self.pools.len());
        for pool in self.pools {
            if pools.contains_key(&pool.descriptor) {
                return Err(BatonError::DuplicatePool(pool.descriptor));
            }
            pools.insert(pool.descriptor.clone(), pool);
        }

        Ok(ExecutorTransformer {
            rewriter: PoolMethodRewriter::new(
                self.registry.unwrap_or_else(DecorationRegistry::standard),
            ),
            guard: self.guard.unwrap_or_default(),
            pools,
            config: self.config,
        })
    }
}
