pub mod app_config;
pub mod server_auth;
pub mod worker_cache;

pub use app_config::{AppConfig, LoadOptions};
pub use server_auth::{AuthConfig, ServerConfig, DEFAULT_SERVER_URL};
pub use worker_cache::{BackoffConfig, CacheConfig, WorkerConfig};
