//! baton-core
//!
//! Carries per-thread context values across thread-pool submission
//! boundaries.
//!
//! # モジュール構成
//! - **context**: スレッドごとのコンテキスト（ContextStore, ContextSnapshot, ContextScope）
//! - **task**: Runnable / Callable と decorate（submit 時に capture、実行時に install → restore）
//! - **registry**: submission role → decorator の対応表
//! - **instrument**: プール型のどのメソッドに何を注入するか（rewriter, lifecycle guard, transformer）
//! - **ports**: 抽象化レイヤー（CodeInjector）
//! - **impls**: 実装（in-process の InterceptionLayer）
//! - **rt**: tokio 連携（async タスクへの伝搬）
//! - **config**: instrumentation の設定
//! - **error**: エラー型

pub mod config;
pub mod context;
pub mod error;
pub mod impls;
pub mod instrument;
pub mod ports;
pub mod registry;
pub mod rt;
pub mod task;

pub use crate::config::BatonConfig;
pub use crate::context::{ContextKey, ContextScope, ContextSnapshot, ContextStore};
pub use crate::error::{BatonError, InjectionError};
pub use crate::impls::{InterceptionLayer, Weavable, Weaving, Weavings};
pub use crate::instrument::{ExecutorTransformer, SupportedPool};
pub use crate::registry::{DecorationRegistry, DecoratorKind, TypeDescriptor};
pub use crate::task::{Callable, Runnable};
