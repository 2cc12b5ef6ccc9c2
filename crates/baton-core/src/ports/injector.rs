//! CodeInjector port - プール型にコードを注入する仕組み
//!
//! baton は注入そのものは行わず、どこに何を入れるか（InstrumentationSite）
//! を決めるだけです。実際に差し込むのはこの trait の実装です。

use crate::error::InjectionError;
use crate::instrument::{InstrumentationSite, MethodDescriptor};
use crate::registry::TypeDescriptor;

/// CodeInjector は型の宣言メソッドを列挙し、site を適用し、
/// 変更後の型を生成する
///
/// # 呼び出し順
/// 1. `declared_methods(target)`
/// 2. `inject(site)` を site ごとに
/// 3. `emit(target)` で準備済みの型を受け取る
pub trait CodeInjector {
    /// Loadable form of a modified type.
    type Prepared;

    /// Methods declared by `target` and by the types it inherits from,
    /// each tagged with its declaring type.
    fn declared_methods(
        &self,
        target: &TypeDescriptor,
    ) -> Result<Vec<MethodDescriptor>, InjectionError>;

    fn inject(&mut self, site: &InstrumentationSite) -> Result<(), InjectionError>;

    fn emit(&mut self, target: &TypeDescriptor) -> Result<Self::Prepared, InjectionError>;
}
