//! Task - プールに渡される仕事の単位
//!
//! # 二つの役割
//! - **Runnable**: 引数なし・戻り値なしの job
//! - **Callable<T>**: 値を返す job（失敗は `T = Result<_, _>` で表す）
//!
//! どちらもクロージャに blanket impl があるので、呼び出し側は
//! `pool.execute(|| ...)` のように普通に書けます。
//!
//! # Decoration
//! [`decorate_runnable`] / [`decorate_callable`] が submit 時点の
//! コンテキストを capture し、実行時に install → restore します。

mod decorated;

pub use self::decorated::{
    DecoratedCallable, DecoratedRunnable, decorate_all, decorate_callable, decorate_runnable,
};

/// A zero-argument unit of work.
///
/// `run` takes `&mut self` so the same task can be run again, which
/// periodic schedulers rely on.
pub trait Runnable: Send + 'static {
    fn run(&mut self);

    /// Whether this task already carries a captured context.
    fn is_decorated(&self) -> bool {
        false
    }
}

impl<F> Runnable for F
where
    F: FnMut() + Send + 'static,
{
    fn run(&mut self) {
        self()
    }
}

/// A unit of work producing a value.
pub trait Callable<T>: Send + 'static {
    fn call(&mut self) -> T;

    /// Whether this task already carries a captured context.
    fn is_decorated(&self) -> bool {
        false
    }
}

impl<T, F> Callable<T> for F
where
    F: FnMut() -> T + Send + 'static,
{
    fn call(&mut self) -> T {
        self()
    }
}
