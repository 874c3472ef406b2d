//! 镜像引擎错误类型
//!
//! 按影响范围划分：枚举失败终止整个运行，其余错误只影响单个文件

use crate::drive::DriveError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 镜像引擎错误
#[derive(Debug, Error)]
pub enum MirrorError {
    /// 列举远程目录失败（整个运行无文件可传，致命）
    #[error("列举远程目录失败: {0}")]
    Enumeration(#[source] DriveError),

    /// 中转副本准备失败（仅当前文件失败，本地已下载部分保持不变）
    #[error("准备中转副本失败: {name}: {source}")]
    Staging {
        name: String,
        #[source]
        source: DriveError,
    },

    /// 下载过程中传输中断（已写入磁盘的字节保留，下次运行从断点继续）
    #[error("传输中断: {name}: {reason}")]
    Transport { name: String, reason: String },

    /// 校验失败次数超过上限
    #[error("文件校验失败超过上限: {name} (期望 {expected}, 实际 {actual}, 已重试 {attempts} 次)")]
    IntegrityMismatch {
        name: String,
        expected: String,
        actual: String,
        attempts: u32,
    },

    /// 删除中转副本失败（非致命，只记录日志）
    #[error("删除中转副本失败: {staging_id}: {source}")]
    Cleanup {
        staging_id: String,
        #[source]
        source: DriveError,
    },

    /// 本地文件操作失败
    #[error("本地文件操作失败: {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 配置无效
    #[error("配置无效: {0}")]
    Config(String),

    /// 运行已被取消
    #[error("任务已被取消")]
    Cancelled,
}

impl MirrorError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        MirrorError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn transport(name: &str, reason: impl ToString) -> Self {
        MirrorError::Transport {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// 是否因取消而结束（不计入失败）
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MirrorError::Cancelled)
    }
}

pub type Result<T, E = MirrorError> = std::result::Result<T, E>;
