pub mod result;
pub mod task;
pub mod worker;

pub use result::{TaskExecLog, TaskResult, TaskUpdate, WorkerOutput};
pub use task::{Task, TaskStatus};
pub use worker::{WorkerCode, WorkerLanguage, WorkerMetadata};
