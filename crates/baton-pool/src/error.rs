use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool {pool} rejected the task")]
    Rejected { pool: String },

    #[error("task panicked before producing a result")]
    TaskFailed,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("invalid pool config: {0}")]
    Config(String),
}
