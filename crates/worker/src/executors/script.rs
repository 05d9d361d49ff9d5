use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use taskworker_domain::{Task, TaskResult, TaskStatus};
use taskworker_errors::{WorkerError, WorkerResult};
use tracing::{debug, error, info};

use super::sandbox::Sandbox;
use super::TaskExecutor;

/// 在进程内Lua解释器中执行脚本
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    name: String,
    source: Arc<str>,
    timeout: Option<Duration>,
    worker_id: Option<String>,
}

impl ScriptExecutor {
    pub fn new<N: Into<String>, S: Into<Arc<str>>>(name: N, source: S) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            timeout: None,
            worker_id: None,
        }
    }

    pub async fn from_file(path: &Path) -> WorkerResult<Self> {
        let source = tokio::fs::read_to_string(path).await.map_err(|e| {
            WorkerError::config_error(format!("无法读取脚本文件 {}: {e}", path.display()))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "script".to_string());
        Ok(Self::new(name, source))
    }

    /// `None` 或零时长表示不限制
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn with_worker_id<S: Into<String>>(mut self, worker_id: S) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn run_blocking(&self, task: &Task) -> TaskResult {
        let task_json = match serde_json::to_value(task) {
            Ok(value) => value,
            Err(e) => return TaskResult::failed(task, format!("failed to encode task: {e}")),
        };

        let sandbox = match Sandbox::new(&task_json, self.timeout) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                return TaskResult::failed(task, format!("failed to initialise script runtime: {e}"))
            }
        };

        let outcome = sandbox.run(&self.name, &self.source);
        // 脚本可能捕获了超时错误后正常返回
        if sandbox.timed_out() {
            let secs = self.timeout.map(|t| t.as_secs_f64()).unwrap_or_default();
            return TaskResult::failed(task, format!("script execution timed out after {secs}s"));
        }

        match outcome {
            Ok(value) => map_return_value(task, value),
            Err(e) => TaskResult::failed(
                task,
                format!("script execution error: {}", script_error_message(&e)),
            ),
        }
    }
}

#[async_trait]
impl TaskExecutor for ScriptExecutor {
    async fn execute(&self, task: &Task) -> TaskResult {
        debug!("执行脚本任务: task_id={}, script={}", task.task_id, self.name);

        let executor = self.clone();
        let owned = task.clone();
        let result = match tokio::task::spawn_blocking(move || executor.run_blocking(&owned)).await {
            Ok(result) => result,
            Err(e) => {
                error!("脚本执行线程异常: task_id={}, error={}", task.task_id, e);
                TaskResult::failed(task, format!("script execution error: {e}"))
            }
        };

        info!(
            "脚本任务执行完成: task_id={}, status={}",
            task.task_id, result.status
        );

        match &self.worker_id {
            Some(worker_id) => result.with_worker_id(worker_id.clone()),
            None => result,
        }
    }
}

/// 脚本返回值 -> TaskResult
///
/// * 无返回值: COMPLETED，空输出
/// * 带字符串 `status` 字段的表: 状态经过校验，`body` 作为输出
/// * 其他值: COMPLETED，输出 `{"result": value}`
pub fn map_return_value(task: &Task, value: Option<Value>) -> TaskResult {
    let Some(value) = value else {
        return TaskResult::completed(task, Map::new());
    };

    if let Value::Object(mut object) = value {
        if let Some(Value::String(status)) = object.get("status").cloned() {
            let output = match object.remove("body") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(body)) => body,
                Some(other) => wrap_result(other),
            };
            let mut result = TaskResult::from_raw_status(task, &status).with_output(output);
            if result.status.is_failure() {
                if let Some(Value::String(reason)) = result.output_data.get("reason").cloned() {
                    result = result.with_reason_if_absent(reason);
                }
            }
            return result;
        }
        return TaskResult::completed(task, wrap_result(Value::Object(object)));
    }

    TaskResult::new(task, TaskStatus::Completed).with_output(wrap_result(value))
}

fn wrap_result(value: Value) -> Map<String, Value> {
    let mut output = Map::new();
    output.insert("result".to_string(), value);
    output
}

/// 去掉Lua错误中的调用栈，只保留消息本身
fn script_error_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => script_error_message(cause),
        mlua::Error::RuntimeError(message) | mlua::Error::SyntaxError { message, .. } => message
            .split("\nstack traceback:")
            .next()
            .unwrap_or(message)
            .trim()
            .to_string(),
        other => other.to_string(),
    }
}
