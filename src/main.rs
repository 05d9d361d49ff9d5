use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use taskworker::app::Application;
use taskworker::cli::{Cli, WorkerAction};
use taskworker::common::{effective_log_level, init_logging, wait_for_shutdown_signal};
use taskworker::shutdown::ShutdownManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = effective_log_level(&cli.global.log_level, cli.global.verbose);
    init_logging(log_level, &cli.global.log_format)?;

    let config = cli.load_config()?;
    let app = Application::new(config)?;
    let action = cli.worker_action();

    if let WorkerAction::ListRemote(args) = action {
        return app.list_remote(args).await;
    }

    info!(
        "启动任务Worker: worker_id={}, server={}",
        app.config().worker.worker_id,
        app.config().server.normalized_url()
    );

    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;
    let worker = app.run(action, shutdown_rx);
    tokio::pin!(worker);

    // 第一次信号等待当前批次完成，第二次信号直接退出
    let result = tokio::select! {
        result = &mut worker => result,
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            shutdown_manager.shutdown().await;
            tokio::select! {
                result = &mut worker => result,
                _ = wait_for_shutdown_signal() => {
                    warn!("再次收到关闭信号，强制退出");
                    return Ok(());
                }
            }
        }
    };

    if let Err(e) = &result {
        error!("Worker运行失败: {e:#}");
    } else {
        info!("任务Worker已退出");
    }
    result
}
