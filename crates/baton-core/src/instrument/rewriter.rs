//! PoolMethodRewriter - submit 系メソッドの引数を decorate する
//!
//! # ルール
//! - 対象型に直接宣言されたメソッドのみ（継承メソッドは除外）
//! - public かつ non-static のみ
//! - 引数の型が registry の role と完全一致したら decorate
//! - decorate は `release_after_run = false, idempotent = true`
//!   （プール内部で再投入・周期実行されても snapshot を使い回すため）

use std::sync::Arc;

use tracing::debug;

use super::{Advice, FailurePolicy, InstrumentationSite, MethodDescriptor};
use crate::registry::{DecorationRegistry, TypeDescriptor};

pub struct PoolMethodRewriter {
    registry: Arc<DecorationRegistry>,
}

impl PoolMethodRewriter {
    pub fn new(registry: Arc<DecorationRegistry>) -> Self {
        Self { registry }
    }

    /// One site per method that has at least one role-typed parameter.
    pub fn plan(
        &self,
        target: &TypeDescriptor,
        methods: &[MethodDescriptor],
    ) -> Vec<InstrumentationSite> {
        methods
            .iter()
            .filter_map(|method| self.site_for(target, method))
            .collect()
    }

    fn site_for(
        &self,
        target: &TypeDescriptor,
        method: &MethodDescriptor,
    ) -> Option<InstrumentationSite> {
        if &method.declaring_type != target {
            return None;
        }
        if !method.modifiers.is_public() || method.modifiers.is_static {
            return None;
        }

        let before: Vec<Advice> = method
            .signature
            .params()
            .iter()
            .enumerate()
            .filter_map(|(index, param)| {
                self.registry
                    .lookup(param)
                    .map(|kind| Advice::DecorateArgument {
                        index,
                        kind,
                        release_after_run: false,
                        idempotent: true,
                    })
            })
            .collect();

        if before.is_empty() {
            debug!(target_type = %target, method = %method.signature, "no submission parameter");
            return None;
        }

        Some(InstrumentationSite {
            target: target.clone(),
            method: method.signature.clone(),
            before,
            after: Vec::new(),
            failure: FailurePolicy::Propagate,
        })
    }
}
