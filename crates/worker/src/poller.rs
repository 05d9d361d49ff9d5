use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use taskworker_config::{BackoffConfig, WorkerConfig};
use taskworker_domain::{Task, TaskResult};
use taskworker_errors::WorkerResult;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::client::{PollRequest, TaskApi};
use crate::executors::TaskExecutor;
use crate::reporter::ResultReporter;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub task_type: String,
    /// 单次轮询的任务数，同时也是该批次的并发度
    pub count: usize,
    pub worker_id: String,
    pub domain: Option<String>,
    pub poll_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl PollerConfig {
    pub fn from_worker_config<S: Into<String>>(task_type: S, config: &WorkerConfig) -> Self {
        Self {
            task_type: task_type.into(),
            count: config.count.max(1),
            worker_id: config.worker_id.clone(),
            domain: config.domain().map(str::to_string),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
            backoff: config.backoff.clone(),
        }
    }

    fn poll_request(&self) -> PollRequest {
        PollRequest {
            task_type: self.task_type.clone(),
            count: self.count,
            worker_id: self.worker_id.clone(),
            domain: self.domain.clone(),
            timeout_ms: self.poll_timeout.as_millis() as u64,
        }
    }
}

/// 轮询-执行-上报主循环
///
/// 每轮批量拉取任务，为每个任务启动一个独立的tokio任务执行并上报，
/// 全部完成后才进行下一次轮询。
pub struct TaskPoller {
    api: Arc<dyn TaskApi>,
    executor: Arc<dyn TaskExecutor>,
    reporter: Arc<ResultReporter>,
    config: PollerConfig,
    backoff: Backoff,
}

impl TaskPoller {
    pub fn new(
        api: Arc<dyn TaskApi>,
        executor: Arc<dyn TaskExecutor>,
        reporter: Arc<ResultReporter>,
        config: PollerConfig,
    ) -> Self {
        let backoff = Backoff::new(config.backoff.clone());
        Self {
            api,
            executor,
            reporter,
            config,
            backoff,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// 运行直到收到关闭信号；正在执行的批次总会先执行完
    ///
    /// 认证失败不重试，直接返回错误。
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> WorkerResult<()> {
        info!(
            "开始轮询任务: type={}, count={}, worker_id={}, domain={:?}",
            self.config.task_type, self.config.count, self.config.worker_id, self.config.domain
        );

        loop {
            if shutdown_requested(&mut shutdown) {
                break;
            }

            let polled = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                polled = self.poll() => polled,
            };

            match polled {
                Ok(tasks) => {
                    self.backoff.reset();
                    if tasks.is_empty() {
                        tokio::task::yield_now().await;
                    } else {
                        self.dispatch(tasks).await;
                    }
                }
                Err(e) if e.is_auth_error() => {
                    error!("轮询认证失败，停止Worker: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    if e.is_retryable() {
                        warn!(
                            "轮询失败（连续 {} 次），{}ms 后重试: {}",
                            self.backoff.failures(),
                            delay.as_millis(),
                            e
                        );
                    } else {
                        // 服务端拒绝请求或返回无法解析的数据，通常需要人工介入
                        error!(
                            "轮询返回不可恢复的错误（连续 {} 次），{}ms 后重试: {}",
                            self.backoff.failures(),
                            delay.as_millis(),
                            e
                        );
                    }
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Worker已停止: type={}", self.config.task_type);
        Ok(())
    }

    /// 执行一轮轮询和处理，返回本轮处理的任务数
    pub async fn run_once(&self) -> WorkerResult<usize> {
        let tasks = self.poll().await?;
        let count = tasks.len();
        if count > 0 {
            self.dispatch(tasks).await;
        }
        Ok(count)
    }

    async fn poll(&self) -> WorkerResult<Vec<Task>> {
        self.api.batch_poll(&self.config.poll_request()).await
    }

    async fn dispatch(&self, tasks: Vec<Task>) {
        debug!("开始处理 {} 个任务", tasks.len());
        join_all(tasks.into_iter().map(|task| self.process(task))).await;
    }

    /// 执行器中的panic只影响当前任务，并以FAILED结果上报
    async fn process(&self, task: Task) {
        let executor = self.executor.clone();
        let owned = task.clone();
        let handle = tokio::spawn(async move { executor.execute(&owned).await });

        let result = match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!("任务执行崩溃: task_id={}, panic={}", task.task_id, message);
                TaskResult::failed(&task, format!("worker panicked: {message}"))
            }
            Err(e) => TaskResult::failed(&task, format!("worker execution cancelled: {e}")),
        };

        // 上报失败已在上报器中记录
        let _ = self.reporter.report(result).await;
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    use broadcast::error::TryRecvError;
    match shutdown.try_recv() {
        Ok(()) | Err(TryRecvError::Closed) | Err(TryRecvError::Lagged(_)) => true,
        Err(TryRecvError::Empty) => false,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
