use std::sync::Arc;

use chrono::Utc;
use taskworker_domain::{TaskExecLog, TaskResult, TaskUpdate};
use taskworker_errors::WorkerResult;
use tracing::{error, info};

use crate::client::TaskApi;

/// 把任务结果提交给编排服务
///
/// 提交失败只记录日志并返回错误，不重试；服务端会按自身的超时策略
/// 重新下发任务。
pub struct ResultReporter {
    api: Arc<dyn TaskApi>,
    worker_id: String,
}

impl ResultReporter {
    pub fn new<S: Into<String>>(api: Arc<dyn TaskApi>, worker_id: S) -> Self {
        Self {
            api,
            worker_id: worker_id.into(),
        }
    }

    pub fn to_update(&self, result: TaskResult) -> TaskUpdate {
        let created_time = Utc::now().timestamp_millis();
        let logs = result
            .logs
            .into_iter()
            .map(|log| TaskExecLog {
                log,
                task_id: result.task_id.clone(),
                created_time,
            })
            .collect();

        TaskUpdate {
            task_id: result.task_id,
            workflow_instance_id: result.workflow_instance_id,
            status: result.status,
            output_data: result.output_data,
            logs,
            reason_for_incompletion: result.reason_for_incompletion,
            worker_id: result
                .worker_id
                .or_else(|| Some(self.worker_id.clone()).filter(|id| !id.is_empty())),
        }
    }

    pub async fn report(&self, result: TaskResult) -> WorkerResult<()> {
        let update = self.to_update(result);
        match self.api.update_task(&update).await {
            Ok(()) => {
                info!(
                    "任务结果已上报: task_id={}, status={}",
                    update.task_id, update.status
                );
                Ok(())
            }
            Err(e) => {
                error!("任务结果上报失败: task_id={}, error={}", update.task_id, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockTaskApi;
    use serde_json::json;
    use taskworker_domain::{Task, TaskStatus};
    use taskworker_errors::WorkerError;

    fn task() -> Task {
        Task::new("t-1", "wf-1", "greet")
    }

    #[test]
    fn test_update_stamps_logs_and_default_worker_id() {
        let reporter = ResultReporter::new(Arc::new(MockTaskApi::new()), "worker-1");
        let result = TaskResult::failed(&task(), "boom").with_logs(vec!["a".into(), "b".into()]);

        let update = reporter.to_update(result);
        assert_eq!(update.status, TaskStatus::Failed);
        assert_eq!(update.worker_id.as_deref(), Some("worker-1"));
        assert_eq!(update.reason_for_incompletion.as_deref(), Some("boom"));
        assert_eq!(update.logs.len(), 2);
        assert!(update.logs.iter().all(|l| l.task_id == "t-1" && l.created_time > 0));
        assert_eq!(update.logs[1].log, "b");
    }

    #[test]
    fn test_result_worker_id_wins() {
        let reporter = ResultReporter::new(Arc::new(MockTaskApi::new()), "worker-1");
        let result = TaskResult::completed(&task(), Default::default()).with_worker_id("other");
        assert_eq!(reporter.to_update(result).worker_id.as_deref(), Some("other"));
    }

    #[tokio::test]
    async fn test_report_sends_update() {
        let mut api = MockTaskApi::new();
        api.expect_update_task()
            .withf(|update| {
                update.task_id == "t-1"
                    && update.status == TaskStatus::Completed
                    && update.output_data["x"] == json!(1)
            })
            .times(1)
            .returning(|_| Ok(()));

        let reporter = ResultReporter::new(Arc::new(api), "worker-1");
        let mut output = serde_json::Map::new();
        output.insert("x".to_string(), json!(1));
        reporter
            .report(TaskResult::completed(&task(), output))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_report_failure_is_returned() {
        let mut api = MockTaskApi::new();
        api.expect_update_task()
            .times(1)
            .returning(|_| Err(WorkerError::network("connection refused")));

        let reporter = ResultReporter::new(Arc::new(api), "worker-1");
        let err = reporter
            .report(TaskResult::completed(&task(), Default::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Network(_)));
    }
}
