use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use taskworker_domain::WorkerCode;
use taskworker_errors::{WorkerError, WorkerResult};
use tracing::debug;

use crate::auth::AuthProvider;

/// Worker代码注册中心
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// 列出命名空间下的Worker（不含代码正文）
    async fn list_workers(&self, namespace: Option<&str>) -> WorkerResult<Vec<WorkerCode>>;

    async fn get_worker(&self, task_name: &str) -> WorkerResult<WorkerCode>;
}

pub struct HttpRegistryClient {
    server_url: String,
    http_client: reqwest::Client,
    auth: Arc<AuthProvider>,
}

impl HttpRegistryClient {
    pub fn new(server_url: &str, auth: Arc<AuthProvider>, request_timeout: Duration) -> WorkerResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WorkerError::Internal(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            http_client,
            auth,
        })
    }

    async fn fetch(&self, builder: reqwest::RequestBuilder, task_name: Option<&str>) -> WorkerResult<String> {
        let response = self.auth.apply(builder).await?.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match (status, task_name) {
            (s, _) if s.is_success() => Ok(body),
            (StatusCode::NOT_FOUND, Some(name)) => Err(WorkerError::worker_not_found(name)),
            (StatusCode::UNAUTHORIZED, _) => Err(WorkerError::unauthorized(
                "check your auth key/secret or token configuration",
            )),
            (s, _) => Err(WorkerError::Registry(format!("HTTP {} - {}", s.as_u16(), body))),
        }
    }
}

#[async_trait]
impl WorkerRegistry for HttpRegistryClient {
    async fn list_workers(&self, namespace: Option<&str>) -> WorkerResult<Vec<WorkerCode>> {
        let url = format!("{}/worker-code", self.server_url);
        let mut builder = self.http_client.get(&url);
        if let Some(namespace) = namespace.filter(|n| !n.is_empty()) {
            builder = builder.query(&[("namespace", namespace)]);
        }

        let body = self.fetch(builder, None).await?;
        let workers: Vec<WorkerCode> = serde_json::from_str(&body)?;
        debug!("注册中心返回 {} 个Worker", workers.len());
        Ok(workers)
    }

    async fn get_worker(&self, task_name: &str) -> WorkerResult<WorkerCode> {
        let url = format!("{}/worker-code/by-name/{}", self.server_url, task_name);
        let body = self.fetch(self.http_client.get(&url), Some(task_name)).await?;
        Ok(serde_json::from_str(&body)?)
    }
}
