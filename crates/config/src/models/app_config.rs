use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{
    server_auth::{AuthConfig, ServerConfig},
    worker_cache::{CacheConfig, WorkerConfig},
};
use crate::validation::ConfigValidator;

/// 兼容编排服务官方CLI的环境变量
const ENV_OVERRIDES: [(&str, &str); 4] = [
    ("server.url", "CONDUCTOR_SERVER_URL"),
    ("auth.key", "CONDUCTOR_AUTH_KEY"),
    ("auth.secret", "CONDUCTOR_AUTH_SECRET"),
    ("auth.token", "CONDUCTOR_AUTH_TOKEN"),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
}

/// 配置文件定位参数
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub profile: Option<String>,
}

impl AppConfig {
    /// 按 默认值 < 配置文件 < TASKWORKER__* < CONDUCTOR_* 的顺序合并配置
    pub fn load(options: &LoadOptions) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = resolve_config_file(options)? {
            debug!("使用配置文件: {}", path.display());
            builder = builder.add_source(File::from(path.as_path()));
        }

        builder = builder.add_source(
            Environment::with_prefix("TASKWORKER")
                .separator("__")
                .try_parsing(true),
        );

        for (key, var) in ENV_OVERRIDES {
            let value = std::env::var(var).ok().filter(|v| !v.is_empty());
            builder = builder.set_override_option(key, value)?;
        }

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.server.validate()?;
        self.auth.validate()?;
        self.worker.validate()?;
        Ok(())
    }
}

fn resolve_config_file(options: &LoadOptions) -> Result<Option<PathBuf>> {
    if let Some(path) = &options.config_path {
        if !path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", path.display()));
        }
        return Ok(Some(path.clone()));
    }

    let Some(config_dir) = dirs::home_dir().map(|home| home.join(".conductor-cli")) else {
        return Ok(None);
    };

    match options.profile.as_deref().filter(|p| !p.is_empty()) {
        Some(profile) => {
            let path = config_dir.join(format!("config-{profile}.yaml"));
            if !path.exists() {
                return Err(anyhow::anyhow!(
                    "Profile '{}' 不存在 (expected file: {})",
                    profile,
                    path.display()
                ));
            }
            Ok(Some(path))
        }
        None => {
            let path = config_dir.join("config.yaml");
            Ok(exists(&path).then_some(path))
        }
    }
}

fn exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_toml(contents: &str) -> Result<AppConfig> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{contents}").unwrap();
        AppConfig::load(&LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            profile: None,
        })
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = load_toml(
            r#"
            [server]
            url = "https://orkes.example.com"

            [worker]
            worker_id = "worker-7"
            count = 5
            exec_timeout_seconds = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.server.request_timeout_seconds, 30);
        assert_eq!(config.worker.worker_id, "worker-7");
        assert_eq!(config.worker.count, 5);
        assert_eq!(config.worker.poll_timeout_ms, 100);
        assert_eq!(config.worker.exec_timeout_seconds, 60);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let result = load_toml(
            r#"
            [worker]
            worker_id = "worker-7"
            count = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [worker]
            worker_id = "file-worker"
            domain = "staging"

            [cache]
            dir = "/tmp/taskworker-cache"
            "#
        )
        .unwrap();

        let options = LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            profile: None,
        };
        let config = AppConfig::load(&options).unwrap();
        assert_eq!(config.worker.worker_id, "file-worker");
        assert_eq!(config.worker.domain(), Some("staging"));
        assert_eq!(
            config.cache.resolved_dir(),
            PathBuf::from("/tmp/taskworker-cache")
        );
    }

    #[test]
    fn test_load_missing_file_fails() {
        let options = LoadOptions {
            config_path: Some(PathBuf::from("/nonexistent/taskworker.toml")),
            profile: None,
        };
        assert!(AppConfig::load(&options).is_err());
    }
}
