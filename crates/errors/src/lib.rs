use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("网络错误: {0}")]
    Network(String),
    #[error("认证失败 (401 Unauthorized): {0}")]
    Unauthorized(String),
    #[error("Worker '{task_name}' 在注册中心不存在")]
    WorkerNotFound { task_name: String },
    #[error("注册中心错误: {0}")]
    Registry(String),
    #[error("API调用失败: HTTP {status} - {body}")]
    Api { status: u16, body: String },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("缓存错误: {0}")]
    Cache(String),
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("不支持的Worker语言: {0} (支持: LUA, PYTHON)")]
    UnsupportedLanguage(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type WorkerResult<T> = Result<T, WorkerError>;

impl WorkerError {
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        Self::Unauthorized(msg.into())
    }
    pub fn worker_not_found<S: Into<String>>(task_name: S) -> Self {
        Self::WorkerNotFound {
            task_name: task_name.into(),
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn cache_error<S: Into<String>>(msg: S) -> Self {
        Self::Cache(msg.into())
    }
    pub fn execution_error<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }
    /// 轮询循环据此决定是否退避重试
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Network(_) | WorkerError::Timeout(_) => true,
            WorkerError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
    pub fn is_auth_error(&self) -> bool {
        matches!(self, WorkerError::Unauthorized(_))
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(err: std::io::Error) -> Self {
        WorkerError::Internal(format!("IO错误: {err}"))
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WorkerError::Timeout(err.to_string())
        } else if err.is_decode() {
            WorkerError::Serialization(err.to_string())
        } else {
            WorkerError::Network(err.to_string())
        }
    }
}

impl From<anyhow::Error> for WorkerError {
    fn from(err: anyhow::Error) -> Self {
        WorkerError::Internal(err.to_string())
    }
}
