use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskworker_domain::{Task, TaskResult, WorkerLanguage, WorkerMetadata};
use taskworker_errors::{WorkerError, WorkerResult};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{ProcessExecutor, ProcessSettings, ScriptExecutor, TaskExecutor};
use crate::cache::{CachedWorker, DependencyBootstrap, WorkerCodeCache};
use crate::registry::WorkerRegistry;

/// 按任务类型串行化Worker代码解析，不同任务类型互不阻塞
#[derive(Debug, Default)]
pub struct ResolutionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResolutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_for(&self, task_type: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(task_type.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

enum Delegate {
    Script(ScriptExecutor),
    Process(ProcessExecutor),
}

impl Delegate {
    async fn execute(&self, task: &Task) -> TaskResult {
        match self {
            Delegate::Script(executor) => executor.execute(task).await,
            Delegate::Process(executor) => executor.execute(task).await,
        }
    }
}

/// 执行从注册中心下载的Worker代码
///
/// 首次使用（或 `refresh`）时解析代码：命中本地缓存直接使用，否则下载、
/// 写入缓存，需要时准备依赖环境。随后根据语言委托给进程内脚本执行器
/// 或外部进程执行器。
pub struct RegistryExecutor {
    task_type: String,
    registry: Arc<dyn WorkerRegistry>,
    cache: WorkerCodeCache,
    bootstrap: DependencyBootstrap,
    settings: ProcessSettings,
    script_timeout: Option<Duration>,
    locks: Arc<ResolutionLocks>,
    prepared: RwLock<Option<(WorkerMetadata, Arc<Delegate>)>>,
}

impl RegistryExecutor {
    pub fn new<S: Into<String>>(
        task_type: S,
        registry: Arc<dyn WorkerRegistry>,
        cache: WorkerCodeCache,
        bootstrap: DependencyBootstrap,
        settings: ProcessSettings,
    ) -> Self {
        Self {
            task_type: task_type.into(),
            registry,
            cache,
            bootstrap,
            settings,
            script_timeout: None,
            locks: Arc::new(ResolutionLocks::new()),
            prepared: RwLock::new(None),
        }
    }

    pub fn with_script_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.script_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// 与其他执行器共享解析锁
    pub fn with_locks(mut self, locks: Arc<ResolutionLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    /// 解析Worker代码；错误（不存在、未认证、网络）直接返回给调用方
    pub async fn prepare(&self, refresh: bool) -> WorkerResult<WorkerMetadata> {
        let (metadata, _) = self.resolve(refresh).await?;
        Ok(metadata)
    }

    async fn resolve(&self, refresh: bool) -> WorkerResult<(WorkerMetadata, Arc<Delegate>)> {
        let lock = self.locks.lock_for(&self.task_type).await;
        let _guard = lock.lock().await;

        if !refresh {
            if let Some((metadata, delegate)) = self.prepared.read().await.as_ref() {
                return Ok((metadata.clone(), delegate.clone()));
            }
        }

        let cached = if refresh {
            None
        } else {
            self.cache.lookup(&self.task_type).await?
        };

        let worker = match cached {
            Some(worker) => {
                info!(
                    "Using cached worker {} (version {})",
                    self.task_type, worker.metadata.version
                );
                worker
            }
            None => self.download().await?,
        };

        let delegate = Arc::new(self.build_delegate(&worker).await?);
        let prepared = (worker.metadata, delegate);
        *self.prepared.write().await = Some(prepared.clone());
        Ok(prepared)
    }

    async fn download(&self) -> WorkerResult<CachedWorker> {
        info!("从注册中心下载Worker: {}", self.task_type);
        let code = self.registry.get_worker(&self.task_type).await?;
        ensure_supported(&code.language)?;

        let worker = self.cache.store(&self.task_type, &code).await?;

        if code.language.needs_bootstrap() {
            match self.bootstrap.provision(&worker.dir, &code.dependencies).await {
                Ok(outcome) => debug!(
                    "依赖环境就绪: task={}, env_created={}, installed={}",
                    self.task_type, outcome.env_created, outcome.installed
                ),
                Err(e) => warn!(
                    "依赖安装失败，将使用系统解释器执行: task={}, error={}",
                    self.task_type, e
                ),
            }
        }

        Ok(worker)
    }

    async fn build_delegate(&self, worker: &CachedWorker) -> WorkerResult<Delegate> {
        let language = &worker.metadata.language;
        ensure_supported(language)?;
        let artifact = worker.worker_file.to_string_lossy().to_string();
        let settings = self.settings.clone();

        Ok(match language {
            WorkerLanguage::Lua => {
                let mut executor = ScriptExecutor::from_file(&worker.worker_file)
                    .await?
                    .with_timeout(self.script_timeout);
                if let Some(worker_id) = &self.settings.worker_id {
                    executor = executor.with_worker_id(worker_id.clone());
                }
                Delegate::Script(executor)
            }
            WorkerLanguage::Python => {
                let python = DependencyBootstrap::python_interpreter(&worker.dir).await;
                Delegate::Process(ProcessExecutor::new(
                    python.to_string_lossy().to_string(),
                    vec![artifact],
                    settings,
                ))
            }
            WorkerLanguage::NodeJs | WorkerLanguage::Other(_) => {
                return Err(WorkerError::UnsupportedLanguage(language.to_string()))
            }
        })
    }
}

/// NODEJS代码依赖进程内JS运行时的全局对象，无法按stdio协议执行
fn ensure_supported(language: &WorkerLanguage) -> WorkerResult<()> {
    match language {
        WorkerLanguage::Lua | WorkerLanguage::Python => Ok(()),
        WorkerLanguage::NodeJs | WorkerLanguage::Other(_) => {
            Err(WorkerError::UnsupportedLanguage(language.to_string()))
        }
    }
}

#[async_trait]
impl TaskExecutor for RegistryExecutor {
    async fn execute(&self, task: &Task) -> TaskResult {
        match self.resolve(false).await {
            Ok((_, delegate)) => delegate.execute(task).await,
            Err(e) => TaskResult::failed(task, format!("failed to prepare worker: {e}")),
        }
    }
}
