use super::errors::{PoolError, PoolResult};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};


/// Идентификатор задачи, по нему коррелируются ответы воркеров
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Идентификатор воркера. Новый воркер (в т.ч. замена) всегда получает новый id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Parse,
    Validate,
    BatchParse,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Parse => "PARSE",
            TaskKind::Validate => "VALIDATE",
            TaskKind::BatchParse => "BATCH_PARSE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Парсер не падает на синтаксических ошибках, а собирает их в результат
    pub safe: bool,
}

/// Запрос к воркеру: тип задачи вместе с типизированным payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRequest {
    Parse { code: String, options: ParseOptions },
    Validate { code: String },
    BatchParse { codes: Vec<String>, options: ParseOptions },
}

impl TaskRequest {
    pub fn parse(code: impl Into<String>) -> Self {
        TaskRequest::Parse { code: code.into(), options: ParseOptions::default() }
    }

    pub fn validate_code(code: impl Into<String>) -> Self {
        TaskRequest::Validate { code: code.into() }
    }

    pub fn batch_parse<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TaskRequest::BatchParse {
            codes: codes.into_iter().map(Into::into).collect(),
            options: ParseOptions::default(),
        }
    }

    #[inline]
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Parse { .. } => TaskKind::Parse,
            TaskRequest::Validate { .. } => TaskKind::Validate,
            TaskRequest::BatchParse { .. } => TaskKind::BatchParse,
        }
    }

    /// Проверка при постановке в очередь
    pub fn validate(&self) -> PoolResult<()> {
        match self {
            TaskRequest::BatchParse { codes, .. } if codes.is_empty() => {
                Err(PoolError::InvalidTask("batch parse without sources".into()))
            }
            _ => Ok(()),
        }
    }
}


#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    pub priority: Priority,
    /// None - таймаут из конфигурации пула
    pub timeout: Option<Duration>,
}

impl TaskOptions {
    pub fn high() -> Self {
        Self { priority: Priority::High, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> PoolResult<()> {
        match self.timeout {
            Some(t) if t.is_zero() => Err(PoolError::InvalidTask("timeout must be positive".into())),
            _ => Ok(()),
        }
    }
}


#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub supported: bool,
    pub used_bytes: u64,
    pub limit_bytes: u64,
    pub usage_pct: f64,
}


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub total_tasks: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    /// Среднее только по успешным задачам
    pub average_duration_ms: f64,
}


#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub baseline_size: usize,
    pub max_pool_size: usize,
    pub queue_length: usize,
    pub busy_workers: usize,
    pub tasks_queued: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub average_task_time_ms: f64,
    pub pool_utilization_pct: f64,
    pub memory: MemoryStats,
    pub performance: Option<PerformanceReport>,
}

impl PoolStats {
    pub fn idle_workers(&self) -> usize {
        self.pool_size.saturating_sub(self.busy_workers)
    }

    pub fn utilization(&self) -> f64 {
        self.pool_utilization_pct / 100.0
    }

    pub fn success_rate(&self) -> f64 {
        if self.tasks_completed == 0 {
            return 1.0;
        }
        (self.tasks_completed - self.tasks_failed) as f64 / self.tasks_completed as f64
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_tags() {
        assert_eq!(TaskRequest::parse("@startuml").kind(), TaskKind::Parse);
        assert_eq!(TaskRequest::validate_code("").kind(), TaskKind::Validate);
        assert_eq!(TaskRequest::batch_parse(["a", "b"]).kind(), TaskKind::BatchParse);
        assert_eq!(TaskKind::BatchParse.to_string(), "BATCH_PARSE");
    }

    #[test]
    fn empty_batch_is_rejected() {
        let err = TaskRequest::batch_parse(Vec::<String>::new()).validate().unwrap_err();
        assert!(matches!(err, PoolError::InvalidTask(_)));
        assert!(TaskRequest::parse("").validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let opts = TaskOptions::default().with_timeout(Duration::ZERO);
        assert!(opts.validate().is_err());
        assert!(TaskOptions::high().validate().is_ok());
        assert_eq!(TaskOptions::default().priority, Priority::Normal);
    }

    #[test]
    fn stats_ratios() {
        let stats = PoolStats {
            pool_size: 4,
            baseline_size: 2,
            max_pool_size: 8,
            queue_length: 0,
            busy_workers: 1,
            tasks_queued: 10,
            tasks_completed: 10,
            tasks_failed: 2,
            average_task_time_ms: 0.0,
            pool_utilization_pct: 25.0,
            memory: MemoryStats::default(),
            performance: None,
        };
        assert_eq!(stats.idle_workers(), 3);
        assert!((stats.utilization() - 0.25).abs() < f64::EPSILON);
        assert!((stats.success_rate() - 0.8).abs() < f64::EPSILON);
    }
}
