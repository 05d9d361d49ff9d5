use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 注册中心Worker代码声明的语言
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkerLanguage {
    /// 进程内Lua解释器执行
    Lua,
    Python,
    NodeJs,
    Other(String),
}

impl WorkerLanguage {
    pub fn file_extension(&self) -> &'static str {
        match self {
            WorkerLanguage::Lua => ".lua",
            WorkerLanguage::Python => ".py",
            WorkerLanguage::NodeJs => ".js",
            WorkerLanguage::Other(_) => ".txt",
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WorkerLanguage::Lua => "LUA",
            WorkerLanguage::Python => "PYTHON",
            WorkerLanguage::NodeJs => "NODEJS",
            WorkerLanguage::Other(other) => other,
        }
    }

    /// 需要独立运行时环境和依赖安装
    pub fn needs_bootstrap(&self) -> bool {
        matches!(self, WorkerLanguage::Python)
    }
}

impl From<String> for WorkerLanguage {
    fn from(value: String) -> Self {
        match value.to_uppercase().as_str() {
            "LUA" => WorkerLanguage::Lua,
            "PYTHON" => WorkerLanguage::Python,
            "NODEJS" | "JAVASCRIPT" => WorkerLanguage::NodeJs,
            _ => WorkerLanguage::Other(value),
        }
    }
}

impl From<&str> for WorkerLanguage {
    fn from(value: &str) -> Self {
        WorkerLanguage::from(value.to_string())
    }
}

impl From<WorkerLanguage> for String {
    fn from(value: WorkerLanguage) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for WorkerLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 注册中心返回的Worker代码记录
///
/// 列表接口不返回 `code`，因此该字段允许缺省。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub namespace: String,
    pub task_name: String,
    pub language: WorkerLanguage,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// 本地缓存的Worker元数据，每个任务类型一份
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerMetadata {
    pub task_name: String,
    pub language: WorkerLanguage,
    pub version: i64,
    pub worker_code_id: String,
    pub cached_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkerMetadata {
    pub fn from_worker_code(code: &WorkerCode, cached_at: DateTime<Utc>) -> Self {
        Self {
            task_name: code.task_name.clone(),
            language: code.language.clone(),
            version: code.version,
            worker_code_id: code.id.clone(),
            cached_at,
            updated_at: code.updated_at,
        }
    }
}
