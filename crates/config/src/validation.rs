// 配置验证
// 只保留Worker引擎需要的校验规则

use crate::{ConfigError, ConfigResult};

pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// 验证工具函数
pub struct ValidationUtils;

impl ValidationUtils {
    /// 验证字符串非空
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// 验证超时值
    pub fn validate_timeout(timeout_seconds: u64, field_name: &str) -> ConfigResult<()> {
        if timeout_seconds == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if timeout_seconds > 3600 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to 3600 seconds"
            )));
        }
        Ok(())
    }

    /// 验证可选超时值，0 表示不限制
    pub fn validate_optional_timeout(timeout_seconds: u64, field_name: &str) -> ConfigResult<()> {
        if timeout_seconds == 0 {
            return Ok(());
        }
        Self::validate_timeout(timeout_seconds, field_name)
    }

    /// 验证URL格式
    pub fn validate_url(url: &str, field_name: &str) -> ConfigResult<()> {
        Self::validate_not_empty(url, field_name)?;

        if !url.contains("://") {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be a valid URL with protocol"
            )));
        }

        Ok(())
    }

    /// 验证计数值
    pub fn validate_count(count: usize, field_name: &str, max_value: usize) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max_value {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max_value}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("worker-1", "worker.worker_id").is_ok());
        assert!(ValidationUtils::validate_not_empty("   ", "worker.worker_id").is_err());
    }

    #[test]
    fn test_validate_timeouts() {
        assert!(ValidationUtils::validate_timeout(30, "server.request_timeout_seconds").is_ok());
        assert!(ValidationUtils::validate_timeout(0, "server.request_timeout_seconds").is_err());
        assert!(ValidationUtils::validate_timeout(3601, "server.request_timeout_seconds").is_err());
        assert!(ValidationUtils::validate_optional_timeout(0, "worker.exec_timeout_seconds").is_ok());
    }

    #[test]
    fn test_validate_url() {
        assert!(ValidationUtils::validate_url("http://localhost:8080/api", "server.url").is_ok());
        assert!(ValidationUtils::validate_url("localhost:8080", "server.url").is_err());
    }

    #[test]
    fn test_validate_count() {
        assert!(ValidationUtils::validate_count(1, "worker.count", 1000).is_ok());
        assert!(ValidationUtils::validate_count(0, "worker.count", 1000).is_err());
        assert!(ValidationUtils::validate_count(1001, "worker.count", 1000).is_err());
    }
}
