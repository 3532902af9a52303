use super::model::MemoryStats;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tracing::warn;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

impl MemorySample {
    #[inline]
    pub fn ratio(&self) -> f64 {
        self.used_bytes as f64 / self.limit_bytes as f64
    }
}

/// Источник данных о памяти процесса. None - интроспекция недоступна
pub trait MemoryProbe: Send + 'static {
    fn sample(&mut self) -> Option<MemorySample>;
}

impl<F> MemoryProbe for F
where
    F: FnMut() -> Option<MemorySample> + Send + 'static,
{
    fn sample(&mut self) -> Option<MemorySample> {
        self()
    }
}


/// RSS текущего процесса относительно лимита (по умолчанию - вся память машины)
pub struct SysinfoProbe {
    system: System,
    pid: Pid,
    limit_bytes: Option<u64>,
}

impl SysinfoProbe {
    pub fn new(limit_bytes: Option<u64>) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new().with_memory()),
        );
        Self {
            system,
            pid: Pid::from_u32(std::process::id()),
            limit_bytes,
        }
    }
}

impl MemoryProbe for SysinfoProbe {
    fn sample(&mut self) -> Option<MemorySample> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        let used_bytes = self.system.process(self.pid)?.memory();
        let limit_bytes = match self.limit_bytes {
            Some(limit) => limit,
            None => {
                self.system.refresh_memory();
                self.system.total_memory()
            }
        };
        Some(MemorySample { used_bytes, limit_bytes })
    }
}


/// Вето на расширение пула при высокой нагрузке на память.
/// Пул не сжимается и задачи не отменяются по его решению
pub struct MemoryGuard {
    probe: Box<dyn MemoryProbe>,
    threshold: f64,
    last: Option<MemorySample>,
}

impl MemoryGuard {
    pub fn new(probe: impl MemoryProbe, threshold: f64) -> Self {
        Self {
            probe: Box::new(probe),
            threshold,
            last: None,
        }
    }

    fn refresh(&mut self) -> Option<MemorySample> {
        self.last = self.probe.sample().filter(|s| s.limit_bytes > 0);
        self.last
    }

    /// Без данных о памяти расширение разрешено
    pub fn is_available(&mut self) -> bool {
        match self.refresh() {
            Some(sample) if sample.ratio() > self.threshold => {
                warn!(
                    used_mb = sample.used_bytes / (1024 * 1024),
                    limit_mb = sample.limit_bytes / (1024 * 1024),
                    "high memory usage, pool expansion vetoed"
                );
                false
            }
            _ => true,
        }
    }

    pub fn stats(&mut self) -> MemoryStats {
        match self.refresh() {
            Some(sample) => MemoryStats {
                supported: true,
                used_bytes: sample.used_bytes,
                limit_bytes: sample.limit_bytes,
                usage_pct: sample.ratio() * 100.0,
            },
            None => MemoryStats::default(),
        }
    }

    pub fn last_sample(&self) -> Option<MemorySample> {
        self.last
    }
}
