use async_trait::async_trait;
use taskworker_domain::{Task, TaskResult};

pub mod process;
pub mod registry;
pub mod sandbox;
pub mod script;

pub use process::{ProcessExecutor, ProcessSettings, WorkerCredentials};
pub use registry::{RegistryExecutor, ResolutionLocks};
pub use script::ScriptExecutor;

/// 任务执行器
///
/// `execute` 不返回错误：所有失败都转换为 `FAILED` 结果。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> TaskResult;
}

pub enum Executor {
    Script(ScriptExecutor),
    Process(ProcessExecutor),
    Registry(RegistryExecutor),
}

impl Executor {
    pub fn kind(&self) -> &'static str {
        match self {
            Executor::Script(_) => "script",
            Executor::Process(_) => "stdio",
            Executor::Registry(_) => "remote",
        }
    }
}

#[async_trait]
impl TaskExecutor for Executor {
    async fn execute(&self, task: &Task) -> TaskResult {
        match self {
            Executor::Script(executor) => executor.execute(task).await,
            Executor::Process(executor) => executor.execute(task).await,
            Executor::Registry(executor) => executor.execute(task).await,
        }
    }
}

impl From<ScriptExecutor> for Executor {
    fn from(executor: ScriptExecutor) -> Self {
        Executor::Script(executor)
    }
}

impl From<ProcessExecutor> for Executor {
    fn from(executor: ProcessExecutor) -> Self {
        Executor::Process(executor)
    }
}

impl From<RegistryExecutor> for Executor {
    fn from(executor: RegistryExecutor) -> Self {
        Executor::Registry(executor)
    }
}
