//! Context - スレッドごとのコンテキスト値
//!
//! このモジュールは submitter 側のスレッドで設定された値を
//! ワーカースレッドへ運ぶための土台です。
//!
//! # 構成
//! - **ContextKey<T>**: 型付きのキー（`const` で宣言できる）
//! - **ContextStore**: capture / backup / install / restore / clear
//! - **ContextSnapshot**: ある瞬間の全コンテキスト値（immutable）
//! - **ContextScope**: install → restore を Drop で保証するガード
//!
//! # 設計
//! - 各スレッドは `Arc<HashMap>` を 1 つ持つ。capture は Arc の clone のみ
//! - 値の変更は copy-on-write（snapshot は絶対に書き換わらない）
//! - install は merge ではなく total replace

mod scope;
mod snapshot;
mod store;

pub use self::scope::ContextScope;
pub use self::snapshot::ContextSnapshot;
pub use self::store::{ContextKey, ContextStore};
