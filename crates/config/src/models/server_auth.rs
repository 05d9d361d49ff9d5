use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl ServerConfig {
    /// 规范化服务端地址：去掉末尾的 `/`，缺少 `/api` 时补上
    pub fn normalized_url(&self) -> String {
        let trimmed = self.url.trim();
        if trimmed.is_empty() {
            return DEFAULT_SERVER_URL.to_string();
        }
        let trimmed = trimmed.trim_end_matches('/');
        if trimmed.ends_with("/api") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/api")
        }
    }
}

impl ConfigValidator for ServerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_url(&self.normalized_url(), "server.url")?;
        ValidationUtils::validate_timeout(
            self.request_timeout_seconds,
            "server.request_timeout_seconds",
        )?;
        Ok(())
    }
}

/// 认证配置
///
/// 优先级：静态token > 缓存token > key/secret换取的临时token。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub key: Option<String>,
    pub secret: Option<String>,
    pub token: Option<String>,
    pub cached_token: Option<String>,
    /// Unix秒；-1 表示长期有效
    pub cached_token_expiry: Option<i64>,
}

impl AuthConfig {
    pub fn static_token(&self) -> Option<&str> {
        non_empty(&self.token)
    }

    pub fn cached_token(&self) -> Option<&str> {
        non_empty(&self.cached_token)
    }

    pub fn key_secret(&self) -> Option<(&str, &str)> {
        match (non_empty(&self.key), non_empty(&self.secret)) {
            (Some(key), Some(secret)) => Some((key, secret)),
            _ => None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.static_token().is_some() || self.cached_token().is_some() || self.key_secret().is_some()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ConfigValidator for AuthConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if non_empty(&self.key).is_some() != non_empty(&self.secret).is_some() {
            return Err(crate::ConfigError::Validation(
                "auth.key and auth.secret must be configured together".to_string(),
            ));
        }
        Ok(())
    }
}
