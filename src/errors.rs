use super::model::{TaskId, WorkerId};
use std::time::Duration;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Capacity,
    Timeout,
    WorkerFault,
    Shutdown,
    Task,
    InvalidTask,
    Initialization,
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("task queue is full ({capacity} pending)")]
    Capacity { capacity: usize },
    #[error("{task} timed out after {timeout:?}")]
    Timeout { task: TaskId, timeout: Duration },
    #[error("{worker} fault: {message}")]
    WorkerFault { worker: WorkerId, message: String },
    #[error("worker pool is shutting down")]
    Shutdown,
    #[error("task failed: {0}")]
    Task(String),
    #[error("invalid task: {0}")]
    InvalidTask(String),
    #[error("worker pool failed to initialize: {0}")]
    Initialization(String),
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::Capacity { .. } => ErrorKind::Capacity,
            PoolError::Timeout { .. } => ErrorKind::Timeout,
            PoolError::WorkerFault { .. } => ErrorKind::WorkerFault,
            PoolError::Shutdown => ErrorKind::Shutdown,
            PoolError::Task(_) => ErrorKind::Task,
            PoolError::InvalidTask(_) => ErrorKind::InvalidTask,
            PoolError::Initialization(_) => ErrorKind::Initialization,
            PoolError::Config(_) => ErrorKind::Config,
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
