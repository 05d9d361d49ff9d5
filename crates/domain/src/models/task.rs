use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 编排服务下发的任务
///
/// 只声明Worker引擎实际读取的字段，其余字段原样保留在 `extra` 中，
/// 以便stdio Worker在标准输入中拿到与服务端完全一致的任务记录。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    #[serde(default)]
    pub workflow_instance_id: String,
    pub task_type: String,
    #[serde(default)]
    pub input_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i32>,
    /// 以下时间戳均为毫秒级Unix时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// 构造一个最小任务，主要用于测试和本地调试
    pub fn new<S: Into<String>>(task_id: S, workflow_instance_id: S, task_type: S) -> Self {
        Self {
            task_id: task_id.into(),
            workflow_instance_id: workflow_instance_id.into(),
            task_type: task_type.into(),
            input_data: Map::new(),
            worker_id: None,
            poll_count: None,
            retry_count: None,
            scheduled_time: None,
            start_time: None,
            end_time: None,
            update_time: None,
            extra: Map::new(),
        }
    }

    pub fn with_input(mut self, key: &str, value: Value) -> Self {
        self.input_data.insert(key.to_string(), value);
        self
    }
}

/// 任务结果状态，只允许这四个取值
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Completed,
    Failed,
    FailedWithTerminalError,
    InProgress,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::FailedWithTerminalError => "FAILED_WITH_TERMINAL_ERROR",
            TaskStatus::InProgress => "IN_PROGRESS",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::FailedWithTerminalError
        )
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "FAILED_WITH_TERMINAL_ERROR" => Ok(TaskStatus::FailedWithTerminalError),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            other => Err(format!("invalid status from worker: {other}")),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
