// 远程对象服务抽象
//
// 引擎只依赖这四个能力：列举、复制、按范围读取、删除

use crate::drive::{FileListPage, ListQuery};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::ops::Range;
use thiserror::Error;

/// 远程读取返回的字节流
pub type ByteStream = BoxStream<'static, Result<Bytes, DriveError>>;

/// 远程服务错误
#[derive(Debug, Error)]
pub enum DriveError {
    /// 网络层错误（连接、超时、流中断）
    #[error("HTTP请求失败: {0}")]
    Http(#[from] reqwest::Error),

    /// API 返回错误状态
    #[error("Drive API 错误 {status}: {message}")]
    Api { status: u16, message: String },

    /// 响应内容无法解析
    #[error("响应解析失败: {0}")]
    Decode(String),
}

impl DriveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriveError::Api { status: 404, .. })
    }
}

/// 远程对象服务
#[async_trait]
pub trait RemoteObjectService: Send + Sync {
    /// 列出一页匹配查询的条目
    async fn list(
        &self,
        query: &ListQuery,
        page_token: Option<&str>,
    ) -> Result<FileListPage, DriveError>;

    /// 复制对象到目标容器，返回新对象ID
    ///
    /// 新对象记录源对象ID，供之后按源ID查找
    async fn copy(&self, object_id: &str, destination: &str) -> Result<String, DriveError>;

    /// 读取对象的字节范围
    ///
    /// `range.end` 原样写入 `Range: bytes=start-end`，服务端会截断到文件末尾
    async fn get_range(&self, object_id: &str, range: Range<u64>)
        -> Result<ByteStream, DriveError>;

    /// 删除对象
    async fn delete(&self, object_id: &str) -> Result<(), DriveError>;
}
