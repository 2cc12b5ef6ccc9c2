//! Ports - 抽象化レイヤー
//!
//! 外部の協調者（コード注入の仕組み）へのインターフェースを定義します。
//! 実装は `impls` に置きます（in-process の InterceptionLayer）。

pub mod injector;

pub use self::injector::CodeInjector;
