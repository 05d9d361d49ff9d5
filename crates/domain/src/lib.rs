//! 任务Worker领域模型
//!
//! 编排服务下发的任务、执行结果、stdio协议的输出格式，以及注册中心
//! 中Worker代码与本地缓存元数据的定义。所有类型都与编排服务的JSON
//! 线上格式（camelCase）保持一致。

pub mod models;

pub use models::*;
