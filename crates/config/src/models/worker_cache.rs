use std::path::PathBuf;

use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub domain: Option<String>,
    /// 每次批量轮询的任务数，同时也是单批次的并发度
    pub count: usize,
    pub poll_timeout_ms: u64,
    /// 外部进程执行超时，0 表示不限制
    pub exec_timeout_seconds: u64,
    /// 进程内脚本执行超时，0 表示不限制
    pub script_timeout_seconds: u64,
    pub verbose: bool,
    pub backoff: BackoffConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            domain: None,
            count: 1,
            poll_timeout_ms: 100,
            exec_timeout_seconds: 0,
            script_timeout_seconds: 0,
            verbose: false,
            backoff: BackoffConfig::default(),
        }
    }
}

fn default_worker_id() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "taskworker".to_string())
}

impl WorkerConfig {
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref().filter(|d| !d.is_empty())
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.worker_id, "worker.worker_id")?;
        ValidationUtils::validate_count(self.count, "worker.count", 1000)?;
        ValidationUtils::validate_optional_timeout(
            self.exec_timeout_seconds,
            "worker.exec_timeout_seconds",
        )?;
        ValidationUtils::validate_optional_timeout(
            self.script_timeout_seconds,
            "worker.script_timeout_seconds",
        )?;
        self.backoff.validate()?;
        Ok(())
    }
}

/// 轮询失败时的指数退避参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 200,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl ConfigValidator for BackoffConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.initial_ms == 0 || self.max_ms < self.initial_ms {
            return Err(crate::ConfigError::Validation(format!(
                "worker.backoff requires 0 < initial_ms <= max_ms (got {} / {})",
                self.initial_ms, self.max_ms
            )));
        }
        if self.multiplier < 1.0 {
            return Err(crate::ConfigError::Validation(
                "worker.backoff.multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(crate::ConfigError::Validation(
                "worker.backoff.jitter_factor must be within 0.0-1.0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
}

impl CacheConfig {
    /// 默认缓存目录 `~/.conductor-cli/workers`
    pub fn resolved_dir(&self) -> PathBuf {
        if let Some(dir) = &self.dir {
            return dir.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".conductor-cli")
            .join("workers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_validation() {
        let config = WorkerConfig {
            worker_id: "worker-001".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.worker_id = "".to_string();
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.count = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config;
        invalid.backoff.multiplier = 0.5;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_domain_filters_empty() {
        let mut config = WorkerConfig::default();
        assert!(config.domain().is_none());
        config.domain = Some(String::new());
        assert!(config.domain().is_none());
        config.domain = Some("prod".to_string());
        assert_eq!(config.domain(), Some("prod"));
    }

    #[test]
    fn test_cache_dir_resolution() {
        let config = CacheConfig {
            dir: Some(PathBuf::from("/tmp/workers")),
        };
        assert_eq!(config.resolved_dir(), PathBuf::from("/tmp/workers"));

        let default_dir = CacheConfig::default().resolved_dir();
        assert!(default_dir.ends_with(".conductor-cli/workers"));
    }
}
