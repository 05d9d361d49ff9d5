use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use taskworker_domain::{Task, TaskUpdate};
use taskworker_errors::{WorkerError, WorkerResult};
use tracing::{debug, warn};

use crate::auth::AuthProvider;

/// 长轮询在轮询超时之外额外预留的请求时间
const POLL_GRACE: Duration = Duration::from_secs(30);

/// 一次批量轮询的参数
#[derive(Debug, Clone, PartialEq)]
pub struct PollRequest {
    pub task_type: String,
    pub count: usize,
    pub worker_id: String,
    pub domain: Option<String>,
    pub timeout_ms: u64,
}

/// 编排服务的任务接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn batch_poll(&self, request: &PollRequest) -> WorkerResult<Vec<Task>>;

    async fn update_task(&self, update: &TaskUpdate) -> WorkerResult<()>;
}

pub struct HttpTaskClient {
    server_url: String,
    http_client: reqwest::Client,
    auth: Arc<AuthProvider>,
}

impl HttpTaskClient {
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

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[async_trait]
impl TaskApi for HttpTaskClient {
    async fn batch_poll(&self, request: &PollRequest) -> WorkerResult<Vec<Task>> {
        let url = format!("{}/tasks/poll/batch/{}", self.server_url, request.task_type);

        let mut query = vec![
            ("count", request.count.to_string()),
            ("timeout", request.timeout_ms.to_string()),
            ("workerid", request.worker_id.clone()),
        ];
        if let Some(domain) = request.domain.as_deref().filter(|d| !d.is_empty()) {
            query.push(("domain", domain.to_string()));
        }

        let builder = self
            .http_client
            .get(&url)
            .query(&query)
            .timeout(Duration::from_millis(request.timeout_ms) + POLL_GRACE);
        let response = self.auth.apply(builder).await?.send().await?;
        let response = check_status(response).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tasks: Vec<Task> = serde_json::from_str(&body)?;
        debug!("轮询到 {} 个任务: type={}", tasks.len(), request.task_type);
        Ok(tasks)
    }

    async fn update_task(&self, update: &TaskUpdate) -> WorkerResult<()> {
        let url = format!("{}/tasks", self.server_url);
        let builder = self.http_client.post(&url).json(update);
        let response = self.auth.apply(builder).await?.send().await?;
        check_status(response).await?;
        Ok(())
    }
}

/// 401 映射为认证错误，其余非2xx映射为 `Api`
async fn check_status(response: Response) -> WorkerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return Err(WorkerError::unauthorized(
            "check your auth key/secret or token configuration",
        ));
    }
    warn!("API请求失败: HTTP {} - {}", status, body);
    Err(WorkerError::Api {
        status: status.as_u16(),
        body,
    })
}
