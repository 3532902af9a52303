use super::errors::{PoolError, PoolResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;


/// Конфигурация пула воркеров. Обычно читается из TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Минимальный размер пула, ниже него пул не сжимается
    #[serde(default = "default_baseline_size")]
    pub baseline_size: usize,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub adaptive_pooling: bool,
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
    /// None - весь объём памяти машины
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,
    /// Доля лимита, выше которой расширение пула запрещено
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,
    /// Ёмкость скользящего журнала PerformanceMonitor
    #[serde(default = "default_monitor_capacity")]
    pub monitor_capacity: usize,
}

fn default_baseline_size() -> usize { num_cpus::get().clamp(1, 4) }
fn default_max_pool_size() -> usize { (default_baseline_size() * 2).min(8) }
fn default_max_queue_length() -> usize { 1000 }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_true() -> bool { true }
fn default_health_interval_ms() -> u64 { 30_000 }
fn default_report_interval_ms() -> u64 { 300_000 }
fn default_memory_threshold() -> f64 { 0.9 }
fn default_monitor_capacity() -> usize { 1000 }

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            baseline_size: default_baseline_size(),
            max_pool_size: default_max_pool_size(),
            max_queue_length: default_max_queue_length(),
            default_timeout_ms: default_timeout_ms(),
            adaptive_pooling: default_true(),
            health_interval_ms: default_health_interval_ms(),
            report_interval_ms: default_report_interval_ms(),
            memory_limit_bytes: None,
            memory_threshold: default_memory_threshold(),
            monitor_capacity: default_monitor_capacity(),
        }
    }
}

impl PoolConfig {
    pub fn new(baseline_size: usize, max_pool_size: usize, max_queue_length: usize) -> Self {
        Self {
            baseline_size,
            max_pool_size,
            max_queue_length,
            ..Default::default()
        }
    }

    /// Фиксированный пул по числу ядер, без адаптивного роста
    pub fn fixed() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            baseline_size: num_cpus,
            max_pool_size: num_cpus,
            adaptive_pooling: false,
            ..Default::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> PoolResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| PoolError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_adaptive_pooling(mut self, enabled: bool) -> Self {
        self.adaptive_pooling = enabled;
        self
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_memory_limit(mut self, limit_bytes: u64) -> Self {
        self.memory_limit_bytes = Some(limit_bytes);
        self
    }

    #[inline]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    #[inline]
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    #[inline]
    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.baseline_size == 0 {
            return Err(PoolError::Config("baseline_size must be at least 1".into()));
        }
        if self.baseline_size > self.max_pool_size {
            return Err(PoolError::Config(format!(
                "baseline_size {} exceeds max_pool_size {}",
                self.baseline_size, self.max_pool_size
            )));
        }
        if self.max_queue_length == 0 {
            return Err(PoolError::Config("max_queue_length must be at least 1".into()));
        }
        if self.default_timeout_ms == 0 || self.health_interval_ms == 0 || self.report_interval_ms == 0 {
            return Err(PoolError::Config("timeouts and intervals must be positive".into()));
        }
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 1.0) {
            return Err(PoolError::Config(format!(
                "memory_threshold {} is outside (0, 1]",
                self.memory_threshold
            )));
        }
        if self.monitor_capacity == 0 {
            return Err(PoolError::Config("monitor_capacity must be at least 1".into()));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.baseline_size <= 4);
        assert!(config.max_pool_size <= 8);
        assert_eq!(config.max_queue_length, 1000);
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.health_interval(), Duration::from_secs(30));
        assert_eq!(config.report_interval(), Duration::from_secs(300));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = PoolConfig::from_toml_str(
            r#"
            baseline_size = 2
            max_pool_size = 6
            adaptive_pooling = false
            "#,
        )
        .unwrap();
        assert_eq!(config.baseline_size, 2);
        assert_eq!(config.max_pool_size, 6);
        assert!(!config.adaptive_pooling);
        assert_eq!(config.max_queue_length, 1000);
        assert_eq!(config.memory_threshold, 0.9);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = PoolConfig::new(4, 2, 10).validate().unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
        assert!(PoolConfig::new(0, 2, 10).validate().is_err());
        assert!(PoolConfig::new(1, 2, 0).validate().is_err());
    }

    #[test]
    fn rejects_bad_threshold_from_toml() {
        let err = PoolConfig::from_toml_str("memory_threshold = 1.5").unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn fixed_preset_disables_adaptation() {
        let config = PoolConfig::fixed();
        assert_eq!(config.baseline_size, config.max_pool_size);
        assert!(!config.adaptive_pooling);
    }
}
