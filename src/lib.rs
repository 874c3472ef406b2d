// Drive Mirror Library
// 网盘目录镜像核心库：中转复制绕过配额、断点续传、续传文件 MD5 校验

// 配置管理模块
pub mod config;

// 远程网盘接口模块
pub mod drive;

// 错误类型
pub mod error;

// 日志系统
pub mod logging;

// 镜像引擎模块
pub mod mirror;

// 导出常用类型
pub use config::AppConfig;
pub use drive::{DriveClient, DriveError, FileDescriptor, RemoteObjectService};
pub use error::MirrorError;
pub use mirror::{MirrorEngine, RunSummary};
