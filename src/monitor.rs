use super::model::{PerformanceReport, TaskId, TaskKind, WorkerId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::VecDeque, time::Duration};


#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task: TaskId,
    pub kind: TaskKind,
    pub duration: Duration,
    pub success: bool,
    pub worker: WorkerId,
    pub timestamp: DateTime<Utc>,
}

/// Скользящий журнал завершённых задач. Только для отчётов:
/// планировщик его не читает
pub struct PerformanceMonitor {
    records: VecDeque<TaskRecord>,
    capacity: usize,
}

impl PerformanceMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, task: TaskId, kind: TaskKind, worker: WorkerId, duration: Duration, success: bool) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(TaskRecord {
            task,
            kind,
            duration,
            success,
            worker,
            timestamp: Utc::now(),
        });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter()
    }

    pub fn report(&self) -> Option<PerformanceReport> {
        if self.records.is_empty() {
            return None;
        }
        let total = self.records.len();
        let (successes, total_ms) = self
            .records
            .iter()
            .filter(|r| r.success)
            .fold((0usize, 0.0f64), |(n, ms), r| (n + 1, ms + r.duration.as_secs_f64() * 1000.0));
        let failures = total - successes;

        Some(PerformanceReport {
            total_tasks: total,
            success_rate: successes as f64 / total as f64 * 100.0,
            failure_rate: failures as f64 / total as f64 * 100.0,
            average_duration_ms: if successes == 0 { 0.0 } else { total_ms / successes as f64 },
        })
    }
}
