//! Адаптивный пул изолированных воркеров для разбора и валидации текста диаграмм
//!
//! # Features
//! - Приоритетная ограниченная очередь (high/normal) с backpressure
//! - Выбор воркера с наименьшей нагрузкой, при равенстве - самого старого по использованию
//! - Адаптивное расширение/сжатие пула в границах [baseline, max]
//! - Вето на расширение при нехватке памяти процесса
//! - Таймауты задач с заменой зависшего воркера
//! - Скользящая статистика выполнения и периодические отчёты

pub mod config;
pub mod errors;
pub mod handle;
pub mod memory;
pub mod model;
pub mod monitor;
pub mod pool;
mod queue;
pub mod worker;

pub use config::PoolConfig;
pub use errors::{ErrorKind, PoolError, PoolResult};
pub use handle::TaskHandle;
pub use memory::{MemoryGuard, MemoryProbe, MemorySample, SysinfoProbe};
pub use model::{
    MemoryStats, ParseOptions, PerformanceReport, PoolStats, Priority, TaskId, TaskKind,
    TaskOptions, TaskRequest, WorkerId,
};
pub use pool::{PoolController, WorkerPool};
pub use worker::{ExecutorFactory, TaskExecutor};
