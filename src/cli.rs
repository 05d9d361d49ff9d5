use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use taskworker_config::{AppConfig, ConfigValidator, LoadOptions};

/// 任务Worker命令行
#[derive(Parser, Debug)]
#[command(name = "taskworker")]
#[command(version)]
#[command(about = "任务Worker执行引擎 - 轮询编排服务并执行任务")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// 配置文件路径
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 配置profile，对应 ~/.conductor-cli/config-<profile>.yaml
    #[arg(long, global = true, env = "CONDUCTOR_PROFILE")]
    pub profile: Option<String>,

    /// 编排服务地址
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    #[arg(long, global = true)]
    pub auth_key: Option<String>,

    #[arg(long, global = true)]
    pub auth_secret: Option<String>,

    #[arg(long, global = true)]
    pub auth_token: Option<String>,

    /// 日志级别
    #[arg(short, long, global = true, default_value = "info",
          value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: String,

    /// 日志格式
    #[arg(long, global = true, default_value = "pretty", value_parser = ["json", "pretty"])]
    pub log_format: String,

    /// 输出调试日志，并回显外部Worker的输入输出
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行任务Worker
    Worker(WorkerCommands),
}

#[derive(Args, Debug)]
pub struct WorkerCommands {
    #[command(subcommand)]
    pub action: WorkerAction,
}

#[derive(Subcommand, Debug)]
pub enum WorkerAction {
    /// 用进程内Lua脚本执行任务
    Script(ScriptArgs),
    /// 用外部进程执行任务，任务JSON经stdin传入
    Stdio(StdioArgs),
    /// 从注册中心下载Worker代码并执行任务
    Remote(RemoteArgs),
    /// 列出注册中心中的Worker
    ListRemote(ListRemoteArgs),
}

/// 所有轮询类子命令共享的参数
#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// 要轮询的任务类型
    #[arg(long = "type", value_name = "TASK_TYPE")]
    pub task_type: String,

    /// 每次批量轮询的任务数
    #[arg(long)]
    pub count: Option<usize>,

    #[arg(long)]
    pub worker_id: Option<String>,

    #[arg(long)]
    pub domain: Option<String>,

    /// 长轮询等待时间（毫秒）
    #[arg(long, visible_alias = "timeout", value_name = "MS")]
    pub poll_timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ScriptArgs {
    #[command(flatten)]
    pub poll: PollArgs,

    /// 单个任务的脚本执行超时（秒），0 表示不限制
    #[arg(long, value_name = "SECONDS")]
    pub script_timeout: Option<u64>,

    /// Lua脚本文件
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct StdioArgs {
    #[command(flatten)]
    pub poll: PollArgs,

    /// 单个任务的进程执行超时（秒），0 表示不限制
    #[arg(long, value_name = "SECONDS")]
    pub exec_timeout: Option<u64>,

    /// Worker程序
    pub program: String,

    /// 传给Worker程序的参数
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    #[command(flatten)]
    pub poll: PollArgs,

    /// 忽略本地缓存，重新下载Worker代码
    #[arg(long)]
    pub refresh: bool,

    #[arg(long, value_name = "SECONDS")]
    pub exec_timeout: Option<u64>,

    #[arg(long, value_name = "SECONDS")]
    pub script_timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ListRemoteArgs {
    #[arg(long, default_value = "default")]
    pub namespace: String,
}

impl WorkerAction {
    pub fn poll_args(&self) -> Option<&PollArgs> {
        match self {
            WorkerAction::Script(args) => Some(&args.poll),
            WorkerAction::Stdio(args) => Some(&args.poll),
            WorkerAction::Remote(args) => Some(&args.poll),
            WorkerAction::ListRemote(_) => None,
        }
    }
}

impl Cli {
    pub fn worker_action(&self) -> &WorkerAction {
        match &self.command {
            Commands::Worker(worker) => &worker.action,
        }
    }

    /// 加载配置文件和环境变量，再叠加命令行参数
    pub fn load_config(&self) -> Result<AppConfig> {
        let options = LoadOptions {
            config_path: self.global.config.clone(),
            profile: self.global.profile.clone(),
        };
        let mut config = AppConfig::load(&options).context("加载配置失败")?;
        self.apply_overrides(&mut config);
        config.validate().context("命令行参数校验失败")?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut AppConfig) {
        let global = &self.global;
        if let Some(server) = &global.server {
            config.server.url = server.clone();
        }
        if let Some(key) = &global.auth_key {
            config.auth.key = Some(key.clone());
        }
        if let Some(secret) = &global.auth_secret {
            config.auth.secret = Some(secret.clone());
        }
        if let Some(token) = &global.auth_token {
            config.auth.token = Some(token.clone());
        }
        if global.verbose {
            config.worker.verbose = true;
        }

        let action = self.worker_action();
        if let Some(poll) = action.poll_args() {
            if let Some(count) = poll.count {
                config.worker.count = count;
            }
            if let Some(worker_id) = &poll.worker_id {
                config.worker.worker_id = worker_id.clone();
            }
            if let Some(domain) = &poll.domain {
                config.worker.domain = Some(domain.clone());
            }
            if let Some(poll_timeout) = poll.poll_timeout {
                config.worker.poll_timeout_ms = poll_timeout;
            }
        }

        match action {
            WorkerAction::Script(args) => {
                if let Some(timeout) = args.script_timeout {
                    config.worker.script_timeout_seconds = timeout;
                }
            }
            WorkerAction::Stdio(args) => {
                if let Some(timeout) = args.exec_timeout {
                    config.worker.exec_timeout_seconds = timeout;
                }
            }
            WorkerAction::Remote(args) => {
                if let Some(timeout) = args.exec_timeout {
                    config.worker.exec_timeout_seconds = timeout;
                }
                if let Some(timeout) = args.script_timeout {
                    config.worker.script_timeout_seconds = timeout;
                }
            }
            WorkerAction::ListRemote(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_stdio_collects_trailing_args() {
        let cli = parse(&[
            "taskworker", "worker", "stdio", "--type", "resize", "--count", "4",
            "python3", "worker.py", "--flag", "-v",
        ]);
        match cli.worker_action() {
            WorkerAction::Stdio(args) => {
                assert_eq!(args.poll.task_type, "resize");
                assert_eq!(args.poll.count, Some(4));
                assert_eq!(args.program, "python3");
                assert_eq!(args.args, vec!["worker.py", "--flag", "-v"]);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&[
            "taskworker", "worker", "script", "--type", "greet", "--verbose",
            "--server", "https://example.com", "greet.lua",
        ]);
        assert!(cli.global.verbose);
        assert_eq!(cli.global.server.as_deref(), Some("https://example.com"));
        assert_eq!(cli.global.log_level, "info");
    }

    #[test]
    fn test_timeout_alias_sets_poll_timeout() {
        let cli = parse(&["taskworker", "worker", "script", "--type", "t", "--timeout", "250", "a.lua"]);
        assert_eq!(cli.worker_action().poll_args().unwrap().poll_timeout, Some(250));
    }

    #[test]
    fn test_list_remote_namespace_default() {
        let cli = parse(&["taskworker", "worker", "list-remote"]);
        match cli.worker_action() {
            WorkerAction::ListRemote(args) => assert_eq!(args.namespace, "default"),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_missing_type_is_rejected() {
        assert!(Cli::try_parse_from(["taskworker", "worker", "script", "a.lua"]).is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let cli = parse(&[
            "taskworker", "--auth-token", "tok", "--server", "https://orkes.example.com/",
            "worker", "remote", "--type", "greet", "--count", "8", "--worker-id", "w-9",
            "--domain", "blue", "--exec-timeout", "12", "--script-timeout", "3",
        ]);
        let mut config = AppConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.server.normalized_url(), "https://orkes.example.com/api");
        assert_eq!(config.auth.token.as_deref(), Some("tok"));
        assert_eq!(config.worker.count, 8);
        assert_eq!(config.worker.worker_id, "w-9");
        assert_eq!(config.worker.domain(), Some("blue"));
        assert_eq!(config.worker.exec_timeout_seconds, 12);
        assert_eq!(config.worker.script_timeout_seconds, 3);
        assert!(!config.worker.verbose);
    }
}
