#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;
use taskworker_domain::{Task, TaskUpdate, WorkerCode, WorkerLanguage};
use taskworker_errors::{WorkerError, WorkerResult};
use taskworker_worker::{DependencyInstaller, PollRequest, TaskApi, WorkerRegistry};

pub fn task(id: &str, task_type: &str) -> Task {
    Task::new(id, "wf-1", task_type).with_input("name", json!("conductor"))
}

pub fn worker_code(task_name: &str, language: &str, code: &str) -> WorkerCode {
    WorkerCode {
        id: format!("wc-{task_name}"),
        namespace: "default".to_string(),
        task_name: task_name.to_string(),
        language: WorkerLanguage::from(language),
        code: code.to_string(),
        version: 1,
        description: "test worker".to_string(),
        dependencies: Vec::new(),
        created_at: None,
        updated_at: None,
    }
}

/// 记录下载次数的内存注册中心
pub struct FakeRegistry {
    workers: Mutex<Vec<WorkerCode>>,
    downloads: AtomicUsize,
}

impl FakeRegistry {
    pub fn new(workers: Vec<WorkerCode>) -> Self {
        Self {
            workers: Mutex::new(workers),
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn publish(&self, code: WorkerCode) {
        let mut workers = self.workers.lock().unwrap();
        workers.retain(|w| w.task_name != code.task_name);
        workers.push(code);
    }
}

#[async_trait]
impl WorkerRegistry for FakeRegistry {
    async fn list_workers(&self, _namespace: Option<&str>) -> WorkerResult<Vec<WorkerCode>> {
        Ok(self.workers.lock().unwrap().clone())
    }

    async fn get_worker(&self, task_name: &str) -> WorkerResult<WorkerCode> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        // 让并发解析有机会交错
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.workers
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.task_name.eq_ignore_ascii_case(task_name))
            .cloned()
            .ok_or_else(|| WorkerError::worker_not_found(task_name))
    }
}

/// 只记录调用次数的依赖安装器
#[derive(Default)]
pub struct CountingInstaller {
    pub env_creations: AtomicUsize,
    pub installs: AtomicUsize,
    pub fail: bool,
    pub install_failures: AtomicUsize,
}

impl CountingInstaller {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// 前 `n` 次依赖安装失败
    pub fn failing_installs(n: usize) -> Self {
        Self {
            install_failures: AtomicUsize::new(n),
            ..Default::default()
        }
    }

    pub fn env_creations(&self) -> usize {
        self.env_creations.load(Ordering::SeqCst)
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DependencyInstaller for CountingInstaller {
    async fn create_env(&self, env_dir: &Path) -> WorkerResult<()> {
        self.env_creations.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(WorkerError::execution_error("python3 not available"));
        }
        tokio::fs::create_dir_all(env_dir).await?;
        Ok(())
    }

    async fn install(&self, _env_dir: &Path, _manifest: &Path) -> WorkerResult<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        let remaining = self.install_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.install_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(WorkerError::execution_error("pip: network down"));
        }
        Ok(())
    }
}

/// 第一次轮询返回给定任务，之后返回空批次
pub struct ScriptedApi {
    batches: Mutex<Vec<Vec<Task>>>,
    polls: AtomicUsize,
    updates: Mutex<Vec<TaskUpdate>>,
}

impl ScriptedApi {
    pub fn new(batches: Vec<Vec<Task>>) -> Self {
        Self {
            batches: Mutex::new(batches.into_iter().rev().collect()),
            polls: AtomicUsize::new(0),
            updates: Mutex::new(Vec::new()),
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> Vec<TaskUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskApi for ScriptedApi {
    async fn batch_poll(&self, _request: &PollRequest) -> WorkerResult<Vec<Task>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.batches.lock().unwrap().pop();
        match next {
            Some(batch) => Ok(batch),
            None => {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn update_task(&self, update: &TaskUpdate) -> WorkerResult<()> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}
