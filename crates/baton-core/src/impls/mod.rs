//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InterceptionLayer**: プロセス内の CodeInjector（メソッド入口で Weaving を適用）

pub mod interception;

pub use self::interception::{InterceptionLayer, Weavable, Weaving, Weavings};
