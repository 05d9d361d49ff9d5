use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use taskworker_config::AppConfig;
use taskworker_domain::WorkerCode;
use taskworker_worker::{
    AuthProvider, DependencyBootstrap, Executor, HttpRegistryClient, HttpTaskClient, PipInstaller,
    PollerConfig, ProcessExecutor, ProcessSettings, RegistryExecutor, ResultReporter,
    ScriptExecutor, TaskPoller, WorkerCodeCache, WorkerRegistry,
};
use tokio::sync::broadcast;
use tracing::info;

use crate::cli::{ListRemoteArgs, RemoteArgs, ScriptArgs, StdioArgs, WorkerAction};

/// 主应用程序：把配置、认证、API客户端和执行器装配起来
pub struct Application {
    config: AppConfig,
    server_url: String,
    auth: Arc<AuthProvider>,
}

impl Application {
    pub fn new(config: AppConfig) -> Result<Self> {
        let server_url = config.server.normalized_url();
        let auth = AuthProvider::new(&server_url, config.auth.clone(), request_timeout(&config))
            .context("创建认证组件失败")?;
        auth.validate_static_token()?;

        if !config.auth.has_credentials() {
            info!("未配置认证信息，请求将不携带认证头");
        }

        Ok(Self {
            config,
            server_url,
            auth: Arc::new(auth),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 运行一个worker子命令
    pub async fn run(&self, action: &WorkerAction, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        match action {
            WorkerAction::Script(args) => self.run_script(args, shutdown_rx).await,
            WorkerAction::Stdio(args) => self.run_stdio(args, shutdown_rx).await,
            WorkerAction::Remote(args) => self.run_remote(args, shutdown_rx).await,
            WorkerAction::ListRemote(args) => self.list_remote(args).await,
        }
    }

    async fn run_script(&self, args: &ScriptArgs, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let executor = ScriptExecutor::from_file(&args.file)
            .await
            .with_context(|| format!("读取脚本失败: {}", args.file.display()))?
            .with_timeout(self.script_timeout())
            .with_worker_id(self.config.worker.worker_id.clone());
        info!("使用脚本Worker: {}", args.file.display());

        self.run_poller(&args.poll.task_type, executor.into(), shutdown_rx)
            .await
    }

    async fn run_stdio(&self, args: &StdioArgs, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        ensure_program_exists(&args.program)?;
        let executor = ProcessExecutor::new(
            args.program.clone(),
            args.args.clone(),
            ProcessSettings::from_config(&self.config),
        );
        info!("使用外部进程Worker: {} {:?}", args.program, args.args);

        self.run_poller(&args.poll.task_type, executor.into(), shutdown_rx)
            .await
    }

    async fn run_remote(&self, args: &RemoteArgs, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let cache = WorkerCodeCache::new(self.config.cache.resolved_dir());
        let executor = RegistryExecutor::new(
            args.poll.task_type.clone(),
            self.registry()?,
            cache,
            DependencyBootstrap::new(Arc::new(PipInstaller::default())),
            ProcessSettings::from_config(&self.config),
        )
        .with_script_timeout(self.script_timeout());

        let metadata = executor
            .prepare(args.refresh)
            .await
            .with_context(|| format!("准备Worker代码失败: {}", args.poll.task_type))?;
        info!(
            "Worker代码就绪: {} ({}, version {})",
            metadata.task_name,
            metadata.language.as_str(),
            metadata.version
        );

        self.run_poller(&args.poll.task_type, executor.into(), shutdown_rx)
            .await
    }

    /// 打印注册中心中的Worker列表
    pub async fn list_remote(&self, args: &ListRemoteArgs) -> Result<()> {
        let workers = self
            .registry()?
            .list_workers(Some(args.namespace.as_str()))
            .await
            .context("获取Worker列表失败")?;

        if workers.is_empty() {
            println!("No workers found in namespace '{}'", args.namespace);
        } else {
            print!("{}", render_worker_table(&workers));
        }
        Ok(())
    }

    async fn run_poller(
        &self,
        task_type: &str,
        executor: Executor,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let api = Arc::new(
            HttpTaskClient::new(&self.server_url, Arc::clone(&self.auth), request_timeout(&self.config))
                .context("创建任务API客户端失败")?,
        );
        let reporter = Arc::new(ResultReporter::new(
            api.clone(),
            self.config.worker.worker_id.clone(),
        ));
        let config = PollerConfig::from_worker_config(task_type, &self.config.worker);

        info!("启动{}执行器, server={}", executor.kind(), self.server_url);
        let mut poller = TaskPoller::new(api, Arc::new(executor), reporter, config);
        poller
            .run(shutdown_rx)
            .await
            .with_context(|| format!("任务轮询终止: {task_type}"))
    }

    fn registry(&self) -> Result<Arc<dyn WorkerRegistry>> {
        let registry: Arc<dyn WorkerRegistry> = Arc::new(HttpRegistryClient::new(
            &self.server_url,
            Arc::clone(&self.auth),
            request_timeout(&self.config),
        )
        .context("创建注册中心客户端失败")?);
        Ok(registry)
    }

    fn script_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.worker.script_timeout_seconds)).filter(|t| !t.is_zero())
    }
}

fn request_timeout(config: &AppConfig) -> Duration {
    Duration::from_secs(config.server.request_timeout_seconds)
}

/// 带路径的程序必须存在；裸命令名交给PATH查找
fn ensure_program_exists(program: &str) -> Result<()> {
    let path = Path::new(program);
    if path.components().count() > 1 && !path.exists() {
        anyhow::bail!("Worker程序不存在: {program}");
    }
    Ok(())
}

/// 注册中心Worker列表的表格输出
pub fn render_worker_table(workers: &[WorkerCode]) -> String {
    let headers = ["TASK NAME", "LANGUAGE", "VERSION", "DEPENDENCIES", "DESCRIPTION"];
    let rows: Vec<[String; 5]> = workers
        .iter()
        .map(|w| {
            [
                w.task_name.clone(),
                w.language.as_str().to_string(),
                w.version.to_string(),
                if w.dependencies.is_empty() {
                    "-".to_string()
                } else {
                    w.dependencies.join(",")
                },
                w.description.clone(),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: Vec<&str>| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };

    push_row(headers.to_vec());
    for row in &rows {
        push_row(row.iter().map(String::as_str).collect());
    }
    out
}
