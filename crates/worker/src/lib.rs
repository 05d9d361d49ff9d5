pub mod auth;
pub mod backoff;
pub mod cache;
pub mod client;
pub mod executors;
pub mod poller;
pub mod registry;
pub mod reporter;

pub use auth::AuthProvider;
pub use backoff::Backoff;
pub use cache::{
    BootstrapOutcome, DependencyBootstrap, DependencyInstaller, PipInstaller, WorkerCodeCache,
};
pub use client::{HttpTaskClient, PollRequest, TaskApi};
pub use executors::{
    Executor, ProcessExecutor, ProcessSettings, RegistryExecutor, ScriptExecutor, TaskExecutor,
};
pub use poller::{PollerConfig, TaskPoller};
pub use registry::{HttpRegistryClient, WorkerRegistry};
pub use reporter::ResultReporter;
