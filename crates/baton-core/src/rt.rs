//! Tokio 連携 - async タスクにもコンテキストを運ぶ
//!
//! async タスクは poll ごとに別の worker スレッドで動き得るので、
//! [`WithContext`] が poll の間だけ snapshot を install し、
//! poll の終わりに書き込みを snapshot に取り込みます。
//!
//! - `spawn` / `spawn_blocking`: spawn 時点のコンテキストを capture
//! - タスク内の書き込みはそのタスクにだけ残る（spawn 元や他タスクには漏れない）

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::JoinHandle;

use crate::context::{ContextScope, ContextSnapshot, ContextStore};

/// A future polled under its own context.
pub struct WithContext<F> {
    inner: Pin<Box<F>>,
    snapshot: ContextSnapshot,
}

impl<F> WithContext<F> {
    /// The context the next poll runs under.
    pub fn snapshot(&self) -> &ContextSnapshot {
        &self.snapshot
    }
}

impl<F: Future> Future for WithContext<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _scope = ContextScope::enter(&this.snapshot);
        let poll = this.inner.as_mut().poll(cx);
        this.snapshot = ContextStore::capture();
        poll
    }
}

pub trait ContextExt: Future + Sized {
    fn with_context(self, snapshot: ContextSnapshot) -> WithContext<Self> {
        WithContext {
            inner: Box::pin(self),
            snapshot,
        }
    }

    /// Capture the calling thread's context now.
    fn with_current_context(self) -> WithContext<Self> {
        self.with_context(ContextStore::capture())
    }
}

impl<F: Future> ContextExt for F {}

/// `tokio::spawn` carrying the caller's context.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future.with_current_context())
}

/// `tokio::task::spawn_blocking` carrying the caller's context.
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let snapshot = ContextStore::capture();
    tokio::task::spawn_blocking(move || ContextStore::run_with(&snapshot, f))
}
