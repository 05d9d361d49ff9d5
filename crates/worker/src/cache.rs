//! 本地Worker代码缓存
//!
//! 目录结构（每个任务类型一个目录）:
//!
//! ```text
//! <root>/<task_type>/
//!     worker.<ext>
//!     .metadata.json
//!     requirements.txt   (仅PYTHON)
//!     venv/              (仅PYTHON)
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use taskworker_domain::{WorkerCode, WorkerLanguage, WorkerMetadata};
use taskworker_errors::{WorkerError, WorkerResult};
use tokio::process::Command;
use tracing::{debug, info, warn};

const WORKER_FILE_STEM: &str = "worker";
const METADATA_FILE: &str = ".metadata.json";
const REQUIREMENTS_FILE: &str = "requirements.txt";
const VENV_DIR: &str = "venv";
const BASE_REQUIREMENT: &str = "conductor-python";

/// 已缓存且可用的Worker
#[derive(Debug, Clone, PartialEq)]
pub struct CachedWorker {
    pub metadata: WorkerMetadata,
    pub dir: PathBuf,
    pub worker_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WorkerCodeCache {
    root: PathBuf,
}

impl WorkerCodeCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, task_type: &str) -> PathBuf {
        self.root.join(task_type)
    }

    pub fn worker_file(&self, task_type: &str, language: &WorkerLanguage) -> PathBuf {
        self.task_dir(task_type)
            .join(format!("{WORKER_FILE_STEM}{}", language.file_extension()))
    }

    pub fn metadata_file(&self, task_type: &str) -> PathBuf {
        self.task_dir(task_type).join(METADATA_FILE)
    }

    /// 元数据不存在或无法解析时返回 `None`
    pub async fn load_metadata(&self, task_type: &str) -> WorkerResult<Option<WorkerMetadata>> {
        validate_task_type(task_type)?;
        let path = self.metadata_file(task_type);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(WorkerError::cache_error(format!(
                    "读取元数据失败 {}: {e}",
                    path.display()
                )))
            }
        };

        match serde_json::from_str(&content) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                warn!("缓存元数据损坏，将重新下载: {} ({})", path.display(), e);
                Ok(None)
            }
        }
    }

    /// 只有元数据和代码文件同时存在才算命中
    pub async fn lookup(&self, task_type: &str) -> WorkerResult<Option<CachedWorker>> {
        let Some(metadata) = self.load_metadata(task_type).await? else {
            return Ok(None);
        };

        let worker_file = self.worker_file(task_type, &metadata.language);
        if !tokio::fs::try_exists(&worker_file).await.unwrap_or(false) {
            debug!(
                "元数据存在但代码文件缺失: {}，视为未缓存",
                worker_file.display()
            );
            return Ok(None);
        }

        Ok(Some(CachedWorker {
            metadata,
            dir: self.task_dir(task_type),
            worker_file,
        }))
    }

    /// 先写代码文件再写元数据，中途失败时不会留下指向缺失文件的元数据
    ///
    /// 目录以请求的任务类型命名，与注册中心返回的 `taskName` 无关。
    pub async fn store(&self, task_type: &str, code: &WorkerCode) -> WorkerResult<CachedWorker> {
        validate_task_type(task_type)?;
        let dir = self.task_dir(task_type);
        create_private_dir(&dir).await?;

        let worker_file = self.worker_file(task_type, &code.language);
        write_private_file(&worker_file, code.code.as_bytes()).await?;

        let metadata = WorkerMetadata::from_worker_code(code, Utc::now());
        let json = serde_json::to_vec_pretty(&metadata)?;
        write_private_file(&self.metadata_file(task_type), &json).await?;

        info!(
            "已缓存Worker: task={}, language={}, version={}",
            task_type, code.language, code.version
        );

        Ok(CachedWorker {
            metadata,
            dir,
            worker_file,
        })
    }
}

/// 运行时环境的依赖安装方式
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    async fn create_env(&self, env_dir: &Path) -> WorkerResult<()>;

    async fn install(&self, env_dir: &Path, manifest: &Path) -> WorkerResult<()>;
}

/// `python3 -m venv` + `pip install -r`
#[derive(Debug, Clone)]
pub struct PipInstaller {
    python: String,
}

impl PipInstaller {
    pub fn new<S: Into<String>>(python: S) -> Self {
        Self {
            python: python.into(),
        }
    }
}

impl Default for PipInstaller {
    fn default() -> Self {
        Self::new("python3")
    }
}

#[async_trait]
impl DependencyInstaller for PipInstaller {
    async fn create_env(&self, env_dir: &Path) -> WorkerResult<()> {
        info!("创建Python虚拟环境: {}", env_dir.display());
        let mut cmd = Command::new(&self.python);
        cmd.arg("-m").arg("venv").arg(env_dir);
        run_quiet(cmd, "create virtualenv").await
    }

    async fn install(&self, env_dir: &Path, manifest: &Path) -> WorkerResult<()> {
        info!("安装Python依赖: {}", manifest.display());
        let mut cmd = Command::new(env_dir.join("bin").join("pip"));
        cmd.arg("install").arg("-r").arg(manifest);
        run_quiet(cmd, "pip install").await
    }
}

async fn run_quiet(mut cmd: Command, action: &str) -> WorkerResult<()> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| WorkerError::execution_error(format!("{action} failed to start: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WorkerError::execution_error(format!(
            "{action} failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub env_created: bool,
    pub installed: bool,
}

/// 为需要运行时环境的Worker准备依赖
#[derive(Clone)]
pub struct DependencyBootstrap {
    installer: Arc<dyn DependencyInstaller>,
}

impl DependencyBootstrap {
    pub fn new(installer: Arc<dyn DependencyInstaller>) -> Self {
        Self { installer }
    }

    pub fn env_dir(dir: &Path) -> PathBuf {
        dir.join(VENV_DIR)
    }

    pub fn manifest_file(dir: &Path) -> PathBuf {
        dir.join(REQUIREMENTS_FILE)
    }

    /// 依赖安装成功过（清单存在）时使用虚拟环境中的解释器
    pub async fn python_interpreter(dir: &Path) -> PathBuf {
        let venv_python = Self::env_dir(dir).join("bin").join("python");
        let installed = tokio::fs::try_exists(Self::manifest_file(dir)).await.unwrap_or(false);
        if installed && tokio::fs::try_exists(&venv_python).await.unwrap_or(false) {
            venv_python
        } else {
            PathBuf::from("python3")
        }
    }

    pub fn manifest_for(dependencies: &[String]) -> String {
        std::iter::once(BASE_REQUIREMENT)
            .chain(dependencies.iter().map(String::as_str).filter(|d| !d.trim().is_empty()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 环境只在缺失时创建；只有新建环境或依赖清单变化时才重新安装
    ///
    /// 磁盘上的清单只代表安装成功的依赖，安装失败时删除清单以便下次重试。
    pub async fn provision(&self, dir: &Path, dependencies: &[String]) -> WorkerResult<BootstrapOutcome> {
        create_private_dir(dir).await?;

        let env_dir = Self::env_dir(dir);
        let manifest_path = Self::manifest_file(dir);
        let manifest = Self::manifest_for(dependencies);

        let mut outcome = BootstrapOutcome::default();

        if !tokio::fs::try_exists(&env_dir).await.unwrap_or(false) {
            self.installer.create_env(&env_dir).await?;
            outcome.env_created = true;
        }

        let previous = tokio::fs::read_to_string(&manifest_path).await.ok();
        let changed = previous.as_deref() != Some(manifest.as_str());
        write_private_file(&manifest_path, manifest.as_bytes()).await?;

        if outcome.env_created || changed {
            if let Err(e) = self.installer.install(&env_dir, &manifest_path).await {
                if let Err(remove_err) = tokio::fs::remove_file(&manifest_path).await {
                    warn!("删除依赖清单失败 {}: {}", manifest_path.display(), remove_err);
                }
                return Err(e);
            }
            outcome.installed = true;
        } else {
            debug!("依赖清单未变化，跳过安装: {}", manifest_path.display());
        }

        Ok(outcome)
    }
}

/// 任务类型直接作为目录名，不允许跳出缓存根目录
fn validate_task_type(task_type: &str) -> WorkerResult<()> {
    let invalid = task_type.is_empty()
        || task_type == "."
        || task_type == ".."
        || task_type.contains(['/', '\\'])
        || task_type.contains("..");
    if invalid {
        return Err(WorkerError::cache_error(format!("非法的任务类型: {task_type:?}")));
    }
    Ok(())
}

async fn create_private_dir(dir: &Path) -> WorkerResult<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder
        .create(dir)
        .await
        .map_err(|e| WorkerError::cache_error(format!("创建目录失败 {}: {e}", dir.display())))
}

async fn write_private_file(path: &Path, contents: &[u8]) -> WorkerResult<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| WorkerError::cache_error(format!("写入文件失败 {}: {e}", path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| WorkerError::cache_error(format!("设置文件权限失败 {}: {e}", path.display())))?;
    }

    Ok(())
}
