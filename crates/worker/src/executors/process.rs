use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use taskworker_config::{AppConfig, AuthConfig};
use taskworker_domain::{Task, TaskResult, WorkerOutput};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::TaskExecutor;

/// 子进程被杀死后等待输出管道关闭的最长时间
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 传递给Worker进程的服务端连接信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerCredentials {
    pub server_url: Option<String>,
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    pub auth_token: Option<String>,
}

impl WorkerCredentials {
    pub fn new(server_url: &str, auth: &AuthConfig) -> Self {
        let (key_id, key_secret) = match auth.key_secret() {
            Some((key, secret)) => (Some(key.to_string()), Some(secret.to_string())),
            None => (None, None),
        };
        Self {
            server_url: Some(server_url.to_string()).filter(|u| !u.is_empty()),
            key_id,
            key_secret,
            auth_token: auth.static_token().map(str::to_string),
        }
    }

    fn env_pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("CONDUCTOR_SERVER_URL", self.server_url.as_deref()),
            ("CONDUCTOR_ACCESS_KEY_ID", self.key_id.as_deref()),
            ("CONDUCTOR_ACCESS_KEY_SECRET", self.key_secret.as_deref()),
            ("CONDUCTOR_AUTH_TOKEN", self.auth_token.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}

/// 外部进程执行参数，所有stdio类执行器共享
#[derive(Debug, Clone, Default)]
pub struct ProcessSettings {
    pub timeout: Option<Duration>,
    pub verbose: bool,
    pub poll_domain: Option<String>,
    pub worker_id: Option<String>,
    pub credentials: WorkerCredentials,
}

impl ProcessSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Some(Duration::from_secs(config.worker.exec_timeout_seconds))
            .filter(|t| !t.is_zero());
        Self {
            timeout,
            verbose: config.worker.verbose,
            poll_domain: config.worker.domain().map(str::to_string),
            worker_id: Some(config.worker.worker_id.clone()),
            credentials: WorkerCredentials::new(&config.server.normalized_url(), &config.auth),
        }
    }
}

/// 通过标准输入输出与外部Worker进程交换任务和结果
///
/// 任务JSON写入子进程stdin；stdout必须是 `{status, output?, logs?, reason?}`。
/// 非零退出码总是视为失败，与stdout内容无关。
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: String,
    args: Vec<String>,
    settings: ProcessSettings,
}

struct ProcessOutput {
    exit: Option<std::process::ExitStatus>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    elapsed: Duration,
}

impl ProcessExecutor {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>, settings: ProcessSettings) -> Self {
        Self {
            program: program.into(),
            args,
            settings,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn command(&self, task: &Task) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("TASK_TYPE", &task.task_type)
            .env("TASK_ID", &task.task_id)
            .env("WORKFLOW_ID", &task.workflow_instance_id)
            .env("EXECUTION_ID", &task.workflow_instance_id);

        if let Some(domain) = self.settings.poll_domain.as_deref().filter(|d| !d.is_empty()) {
            cmd.env("POLL_DOMAIN", domain);
        }
        for (name, value) in self.settings.credentials.env_pairs() {
            cmd.env(name, value);
        }
        cmd
    }

    /// 启动子进程并收集输出；`exit` 为 `None` 表示超时被杀死
    async fn run(&self, task: &Task, input: Vec<u8>) -> std::io::Result<ProcessOutput> {
        let started = Instant::now();
        let mut child = self.command(task).spawn()?;

        let stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // 子进程可能不读取stdin就退出
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("写入Worker stdin失败: {}", e);
                }
            }
        });
        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let exit = match self.settings.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => Some(status?),
                Err(_) => {
                    warn!(
                        "Worker执行超时，终止进程: task_id={}, timeout={:?}",
                        task.task_id, timeout
                    );
                    if let Err(e) = child.kill().await {
                        error!("终止Worker进程失败: {}", e);
                    }
                    None
                }
            },
            None => Some(child.wait().await?),
        };

        writer.abort();
        let drain = if exit.is_some() { None } else { Some(PIPE_DRAIN_TIMEOUT) };
        let stdout = collect(stdout_reader, drain).await;
        let stderr = collect(stderr_reader, drain).await;

        Ok(ProcessOutput {
            exit,
            stdout,
            stderr,
            elapsed: started.elapsed(),
        })
    }

    fn derive_result(&self, task: &Task, output: &ProcessOutput) -> TaskResult {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let Some(exit) = output.exit else {
            let secs = self.settings.timeout.map(|t| t.as_secs()).unwrap_or_default();
            let mut reason = format!("worker execution timed out after {secs}s");
            append_detail(&mut reason, &stderr);
            return TaskResult::failed(task, reason).with_logs(non_empty(stderr));
        };

        if !exit.success() {
            error!("Worker执行失败: task_id={}, {}", task.task_id, exit);
            if !stderr.is_empty() {
                error!("Worker stderr:\n{}", stderr);
            }
            let mut reason = format!("worker execution failed: {exit}");
            append_detail(&mut reason, &stderr);
            return TaskResult::failed(task, reason).with_logs(non_empty(stderr));
        }

        match serde_json::from_slice::<WorkerOutput>(&output.stdout) {
            Ok(parsed) => parsed.into_task_result(task),
            Err(e) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                error!("无法解析Worker输出: task_id={}, error={}", task.task_id, e);
                error!("Worker stdout:\n{}", stdout);
                let mut reason = format!("invalid worker stdout JSON: {e}");
                append_detail(&mut reason, &stdout);
                TaskResult::failed(task, reason).with_logs(vec![stdout])
            }
        }
    }

    fn echo(&self, output: &ProcessOutput) {
        if !output.stdout.is_empty() {
            print!("{}", String::from_utf8_lossy(&output.stdout));
        }
        if !output.stderr.is_empty() {
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
        }
    }
}

#[async_trait]
impl TaskExecutor for ProcessExecutor {
    async fn execute(&self, task: &Task) -> TaskResult {
        let input = match serde_json::to_vec(task) {
            Ok(input) => input,
            Err(e) => return TaskResult::failed(task, format!("failed to encode task: {e}")),
        };

        if self.settings.verbose {
            print_banner("Task Input", &serde_json::to_string_pretty(task).unwrap_or_default());
        }

        debug!(
            "启动Worker进程: task_id={}, command={}, args={:?}",
            task.task_id, self.program, self.args
        );

        let result = match self.run(task, input).await {
            Ok(output) => {
                if self.settings.verbose {
                    self.echo(&output);
                }
                info!(
                    "Worker进程结束: task_id={}, exit={:?}, duration={}ms",
                    task.task_id,
                    output.exit.and_then(|s| s.code()),
                    output.elapsed.as_millis()
                );
                self.derive_result(task, &output)
            }
            Err(e) => {
                error!("无法启动Worker进程 {}: {}", self.program, e);
                TaskResult::failed(task, format!("failed to start worker: {e}"))
            }
        };

        let result = match &self.settings.worker_id {
            Some(worker_id) if result.worker_id.is_none() => result.with_worker_id(worker_id.clone()),
            _ => result,
        };

        if self.settings.verbose {
            let title = if result.status.is_failure() {
                "Task Result (Error)"
            } else {
                "Task Result"
            };
            print_banner(title, &serde_json::to_string_pretty(&result).unwrap_or_default());
        }

        result
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                debug!("读取Worker输出失败: {}", e);
            }
        }
        buf
    })
}

/// 被杀死的进程可能留下仍持有管道的子进程，此时只等待有限时间
async fn collect(reader: JoinHandle<Vec<u8>>, limit: Option<Duration>) -> Vec<u8> {
    let abort = reader.abort_handle();
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, reader).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return Vec::new();
            }
        },
        None => reader.await,
    };
    joined.unwrap_or_default()
}

fn append_detail(reason: &mut String, detail: &str) {
    let detail = detail.trim();
    if !detail.is_empty() {
        reason.push_str(": ");
        reason.push_str(detail);
    }
}

fn non_empty(text: String) -> Vec<String> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![text]
    }
}

fn print_banner(title: &str, body: &str) {
    let line = "=".repeat(title.len() + 8);
    println!("=== {title} ===");
    println!("{body}");
    println!("{line}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_env_only_contains_configured_values() {
        let auth = AuthConfig {
            key: Some("key".to_string()),
            secret: Some("secret".to_string()),
            ..Default::default()
        };
        let credentials = WorkerCredentials::new("http://localhost:8080/api", &auth);
        let env = credentials.env_pairs();
        assert_eq!(
            env,
            vec![
                ("CONDUCTOR_SERVER_URL", "http://localhost:8080/api"),
                ("CONDUCTOR_ACCESS_KEY_ID", "key"),
                ("CONDUCTOR_ACCESS_KEY_SECRET", "secret"),
            ]
        );
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = AppConfig::default();
        config.worker.exec_timeout_seconds = 0;
        config.worker.domain = Some(String::new());
        config.server.url = "https://example.com/".to_string();

        let settings = ProcessSettings::from_config(&config);
        assert!(settings.timeout.is_none());
        assert!(settings.poll_domain.is_none());
        assert_eq!(
            settings.credentials.server_url.as_deref(),
            Some("https://example.com/api")
        );
    }

    #[test]
    fn test_append_detail_skips_blank() {
        let mut reason = "failed".to_string();
        append_detail(&mut reason, "  \n");
        assert_eq!(reason, "failed");
        append_detail(&mut reason, "boom\n");
        assert_eq!(reason, "failed: boom");
    }
}
