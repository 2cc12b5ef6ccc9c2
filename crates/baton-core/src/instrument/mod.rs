//! Instrument - プール型のどこに何を注入するかを決める
//!
//! # フロー
//! 1. CodeInjector からプール型の宣言メソッドを列挙
//! 2. PoolMethodRewriter: submit 系の引数を decorate する site を作る
//! 3. WorkerLifecycleGuard: worker 起動点を clear / restore で囲む site を作る
//! 4. ExecutorTransformer: plan 全体が成功してから inject → emit
//!
//! plan の途中で構造ミスマッチが見つかったら、何も注入せずにエラーを返します。

pub mod lifecycle;
pub mod rewriter;
pub mod transformer;

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

use crate::registry::{DecoratorKind, TypeDescriptor};

pub use self::lifecycle::{WorkerEntryPoint, WorkerLifecycleGuard};
pub use self::rewriter::PoolMethodRewriter;
pub use self::transformer::{ExecutorTransformer, ExecutorTransformerBuilder, SupportedPool};

/// Method name plus parameter types; unique within one declaring type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MethodSignature {
    name: Cow<'static, str>,
    params: Cow<'static, [TypeDescriptor]>,
}

impl MethodSignature {
    pub const fn from_static(name: &'static str, params: &'static [TypeDescriptor]) -> Self {
        Self {
            name: Cow::Borrowed(name),
            params: Cow::Borrowed(params),
        }
    }

    pub fn new(name: impl Into<String>, params: Vec<TypeDescriptor>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            params: Cow::Owned(params),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[TypeDescriptor] {
        &self.params
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Modifiers {
    pub visibility: Visibility,
    pub is_static: bool,
}

impl Modifiers {
    pub const PUBLIC: Modifiers = Modifiers {
        visibility: Visibility::Public,
        is_static: false,
    };
    pub const PUBLIC_STATIC: Modifiers = Modifiers {
        visibility: Visibility::Public,
        is_static: true,
    };
    pub const PRIVATE: Modifiers = Modifiers {
        visibility: Visibility::Private,
        is_static: false,
    };

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

/// One method as enumerated by the injector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodDescriptor {
    pub declaring_type: TypeDescriptor,
    pub signature: MethodSignature,
    pub modifiers: Modifiers,
}

impl MethodDescriptor {
    pub fn new(
        declaring_type: TypeDescriptor,
        signature: MethodSignature,
        modifiers: Modifiers,
    ) -> Self {
        Self {
            declaring_type,
            signature,
            modifiers,
        }
    }
}

/// A piece of code the injector places into a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "advice", rename_all = "snake_case")]
pub enum Advice {
    /// Replace argument `index` (0-based) by its decorated form.
    DecorateArgument {
        index: usize,
        kind: DecoratorKind,
        release_after_run: bool,
        idempotent: bool,
    },
    /// Clear the thread's context, remembering what was there.
    ClearContext,
    /// Put back what `ClearContext` removed.
    RestoreContext,
}

impl Advice {
    /// Code form for the audit log. Arguments are numbered from `$1`.
    pub fn render(&self) -> String {
        match self {
            Advice::DecorateArgument {
                index,
                kind,
                release_after_run,
                idempotent,
            } => {
                let slot = index + 1;
                format!(
                    "${slot} = {}(${slot}, {release_after_run}, {idempotent});",
                    kind.decorator_path()
                )
            }
            Advice::ClearContext => {
                "let backup = baton_core::context::ContextStore::clear();".to_string()
            }
            Advice::RestoreContext => {
                "baton_core::context::ContextStore::restore(backup);".to_string()
            }
        }
    }
}

/// What happens to the after-advice when the method body fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// No after-advice; failures pass straight through.
    Propagate,
    /// After-advice runs on success and on failure, then the failure
    /// continues unchanged.
    Finally,
}

/// Where to inject and what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentationSite {
    pub target: TypeDescriptor,
    pub method: MethodSignature,
    pub before: Vec<Advice>,
    pub after: Vec<Advice>,
    pub failure: FailurePolicy,
}

impl InstrumentationSite {
    pub fn render_before(&self) -> String {
        render_all(&self.before)
    }

    pub fn render_after(&self) -> String {
        render_all(&self.after)
    }

    /// Whether the site clears and restores context around the body.
    pub fn is_guard(&self) -> bool {
        self.before.contains(&Advice::ClearContext) && self.after.contains(&Advice::RestoreContext)
    }
}

fn render_all(advice: &[Advice]) -> String {
    advice.iter().map(Advice::render).collect::<Vec<_>>().join(" ")
}

/// All sites for one target type. Computed completely before anything is
/// injected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentationPlan {
    pub target: TypeDescriptor,
    pub sites: Vec<InstrumentationSite>,
}

impl InstrumentationPlan {
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn site(&self, method: &MethodSignature) -> Option<&InstrumentationSite> {
        self.sites.iter().find(|site| &site.method == method)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD_WORKER_PARAMS: &[TypeDescriptor] = &[TypeDescriptor::RUNNABLE, TypeDescriptor::BOOL];

    #[test]
    fn signature_display() {
        let sig = MethodSignature::from_static("add_worker", ADD_WORKER_PARAMS);
        assert_eq!(sig.to_string(), "add_worker(Runnable, bool)");
        assert_eq!(MethodSignature::new("shutdown", vec![]).to_string(), "shutdown()");
    }

    #[test]
    fn static_and_owned_signatures_are_equal() {
        let a = MethodSignature::from_static("add_worker", ADD_WORKER_PARAMS);
        let b = MethodSignature::new(
            "add_worker",
            vec![TypeDescriptor::RUNNABLE, TypeDescriptor::BOOL],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn decorate_advice_renders_one_based_slot() {
        let advice = Advice::DecorateArgument {
            index: 1,
            kind: DecoratorKind::Callable,
            release_after_run: false,
            idempotent: true,
        };
        assert_eq!(
            advice.render(),
            "$2 = baton_core::task::decorate_callable($2, false, true);"
        );
    }

    #[test]
    fn plan_serializes_for_audit() {
        let plan = InstrumentationPlan {
            target: TypeDescriptor::from_static("Pool"),
            sites: vec![InstrumentationSite {
                target: TypeDescriptor::from_static("Pool"),
                method: MethodSignature::from_static("add_worker", ADD_WORKER_PARAMS),
                before: vec![Advice::ClearContext],
                after: vec![Advice::RestoreContext],
                failure: FailurePolicy::Finally,
            }],
        };
        let json: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(json["target"], "Pool");
        assert_eq!(json["sites"][0]["method"]["params"][1], "bool");
        assert_eq!(json["sites"][0]["before"][0]["advice"], "clear_context");
        assert_eq!(json["sites"][0]["failure"], "finally");
        assert!(plan.sites[0].is_guard());
    }
}
