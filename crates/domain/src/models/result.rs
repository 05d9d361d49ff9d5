use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::task::{Task, TaskStatus};

/// 任务执行结果
///
/// 每个任务只创建一次，由结果上报器消费后丢弃。`status` 只能是
/// [`TaskStatus`] 的四个取值之一，无法识别的状态在构造时被强制转换为
/// `FAILED`，并在 `reason_for_incompletion` 中写明原始值。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub workflow_instance_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub output_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl TaskResult {
    pub fn new(task: &Task, status: TaskStatus) -> Self {
        Self {
            task_id: task.task_id.clone(),
            workflow_instance_id: task.workflow_instance_id.clone(),
            status,
            output_data: Map::new(),
            logs: Vec::new(),
            reason_for_incompletion: None,
            worker_id: None,
        }
    }

    pub fn completed(task: &Task, output: Map<String, Value>) -> Self {
        Self::new(task, TaskStatus::Completed).with_output(output)
    }

    /// 失败结果，原因同时写入输出的 `error` 字段
    pub fn failed<S: Into<String>>(task: &Task, reason: S) -> Self {
        let reason = reason.into();
        let mut output = Map::new();
        output.insert("error".to_string(), Value::String(reason.clone()));
        Self::new(task, TaskStatus::Failed)
            .with_output(output)
            .with_reason(reason)
    }

    /// 根据执行器给出的原始状态字符串构造结果
    pub fn from_raw_status(task: &Task, raw_status: &str) -> Self {
        match raw_status.parse::<TaskStatus>() {
            Ok(status) => Self::new(task, status),
            Err(reason) => Self::new(task, TaskStatus::Failed).with_reason(reason),
        }
    }

    pub fn with_output(mut self, output: Map<String, Value>) -> Self {
        self.output_data = output;
        self
    }

    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason_for_incompletion = Some(reason.into());
        self
    }

    /// 只有在状态未被强制转换时才接受执行器给出的原因
    pub fn with_reason_if_absent<S: Into<String>>(mut self, reason: S) -> Self {
        if self.reason_for_incompletion.is_none() {
            self.reason_for_incompletion = Some(reason.into());
        }
        self
    }

    pub fn with_worker_id<S: Into<String>>(mut self, worker_id: S) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }
}

/// stdio Worker 在标准输出中返回的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkerOutput {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WorkerOutput {
    pub fn into_task_result(self, task: &Task) -> TaskResult {
        let mut result = TaskResult::from_raw_status(task, &self.status);
        if let Some(output) = self.output {
            result.output_data = output;
        }
        if let Some(logs) = self.logs {
            result.logs = logs;
        }
        match self.reason {
            Some(reason) if !reason.is_empty() => result.with_reason_if_absent(reason),
            _ => result,
        }
    }
}

/// 任务执行日志（线上格式）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecLog {
    pub log: String,
    pub task_id: String,
    pub created_time: i64,
}

/// 提交到任务更新接口的请求体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub task_id: String,
    pub workflow_instance_id: String,
    pub status: TaskStatus,
    pub output_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TaskExecLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}
