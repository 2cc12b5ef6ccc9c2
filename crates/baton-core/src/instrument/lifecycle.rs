//! WorkerLifecycleGuard - worker 起動点を clear / restore で囲む
//!
//! 長生きする worker スレッドが、submit 元スレッドや前のタスクの
//! コンテキストを持ち越さないようにするための site を作ります。
//!
//! # 起動点の探し方
//! 1. primary 名（`add_worker`）を探す → 引数が `(Runnable, bool)` でなければ fatal
//! 2. primary が無ければ fallback 名（`add_thread`）→ `(Runnable)` でなければ fatal
//! 3. どちらも無ければ fatal

use super::{Advice, FailurePolicy, InstrumentationSite, MethodDescriptor, MethodSignature};
use crate::error::BatonError;
use crate::registry::TypeDescriptor;

const ADD_WORKER_PARAMS: &[TypeDescriptor] = &[TypeDescriptor::RUNNABLE, TypeDescriptor::BOOL];
const ADD_THREAD_PARAMS: &[TypeDescriptor] = &[TypeDescriptor::RUNNABLE];

/// Expected name and parameter shape of a worker entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEntryPoint {
    pub signature: MethodSignature,
}

impl WorkerEntryPoint {
    /// `add_worker(Runnable, bool)`: first task plus "is core worker".
    pub const ADD_WORKER: WorkerEntryPoint = WorkerEntryPoint {
        signature: MethodSignature::from_static("add_worker", ADD_WORKER_PARAMS),
    };

    /// `add_thread(Runnable)`: older pool variants without the core flag.
    pub const ADD_THREAD: WorkerEntryPoint = WorkerEntryPoint {
        signature: MethodSignature::from_static("add_thread", ADD_THREAD_PARAMS),
    };

    pub fn new(signature: MethodSignature) -> Self {
        Self { signature }
    }

    fn locate<'m>(
        &self,
        target: &TypeDescriptor,
        methods: &'m [MethodDescriptor],
    ) -> Option<&'m MethodDescriptor> {
        methods.iter().find(|method| {
            &method.declaring_type == target && method.signature.name() == self.signature.name()
        })
    }
}

pub struct WorkerLifecycleGuard {
    primary: WorkerEntryPoint,
    fallback: Option<WorkerEntryPoint>,
}

impl WorkerLifecycleGuard {
    pub fn new(primary: WorkerEntryPoint, fallback: Option<WorkerEntryPoint>) -> Self {
        Self { primary, fallback }
    }

    /// Locate and validate the entry point, then build the guard site.
    pub fn plan(
        &self,
        target: &TypeDescriptor,
        methods: &[MethodDescriptor],
    ) -> Result<InstrumentationSite, BatonError> {
        let entry = self.find_entry(target, methods)?;
        Ok(InstrumentationSite {
            target: target.clone(),
            method: entry.signature.clone(),
            before: vec![Advice::ClearContext],
            after: vec![Advice::RestoreContext],
            failure: FailurePolicy::Finally,
        })
    }

    fn find_entry<'m>(
        &self,
        target: &TypeDescriptor,
        methods: &'m [MethodDescriptor],
    ) -> Result<&'m MethodDescriptor, BatonError> {
        if let Some(found) = self.primary.locate(target, methods) {
            return Self::validate(target, &self.primary, found);
        }

        let Some(fallback) = &self.fallback else {
            return Err(self.not_found(target));
        };
        match fallback.locate(target, methods) {
            Some(found) => Self::validate(target, fallback, found),
            None => Err(self.not_found(target)),
        }
    }

    fn validate<'m>(
        target: &TypeDescriptor,
        expected: &WorkerEntryPoint,
        found: &'m MethodDescriptor,
    ) -> Result<&'m MethodDescriptor, BatonError> {
        if found.signature.params() != expected.signature.params() {
            return Err(BatonError::StructuralMismatch {
                target: target.clone(),
                found: found.signature.clone(),
            });
        }
        Ok(found)
    }

    fn not_found(&self, target: &TypeDescriptor) -> BatonError {
        BatonError::EntryPointNotFound {
            target: target.clone(),
            primary: self.primary.signature.clone(),
            fallback: self
                .fallback
                .as_ref()
                .map(|entry| entry.signature.to_string())
                .unwrap_or_else(|| "no fallback".to_string()),
        }
    }
}

impl Default for WorkerLifecycleGuard {
    fn default() -> Self {
        Self::new(WorkerEntryPoint::ADD_WORKER, Some(WorkerEntryPoint::ADD_THREAD))
    }
}
