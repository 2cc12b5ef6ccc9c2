//! baton-pool
//!
//! Worker pools that expose their method tables to the baton interception
//! layer.
//!
//! # 使い方
//! ```ignore
//! let transformer = ExecutorTransformer::builder()
//!     .support(SupportedPool::basic(WorkerPool::TYPE))
//!     .support(SupportedPool::scheduled(ScheduledWorkerPool::TYPE))
//!     .build()?;
//! let mut layer = InterceptionLayer::new();
//! layer.register::<WorkerPool>().register::<ScheduledWorkerPool>();
//! let weavings = layer.prepare_all(&transformer)?;
//!
//! let pool = WorkerPool::builder().core_workers(4).weavings(&weavings).build()?;
//! ```

mod error;
mod handle;
pub mod methods;
mod scheduled;
mod worker_pool;

pub use crate::error::PoolError;
pub use crate::handle::{ScheduledHandle, TaskHandle};
pub use crate::scheduled::{ScheduledWorkerPool, ScheduledWorkerPoolBuilder};
pub use crate::worker_pool::{WorkerPool, WorkerPoolBuilder};
