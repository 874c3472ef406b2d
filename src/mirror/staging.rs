//! 中转副本管理
//!
//! 直接下载他人分享的文件会计入文件所有者的流量配额。先把文件复制到自己账号下的
//! 中转目录，再从副本下载，下载结束后删除副本。
//!
//! 副本带有 `mirrorSourceId` 标记，查找时优先按标记匹配；旧版本留下的无标记副本
//! 按文件名匹配。按名匹配跳过标记了其他源文件的副本，多个候选时只取第一个大小和
//! MD5 都一致的。

use crate::drive::{DriveError, DriveFile, FileDescriptor, ListQuery, RemoteObjectService};
use crate::error::{MirrorError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 中转副本管理器
#[derive(Clone)]
pub struct StagingManager {
    service: Arc<dyn RemoteObjectService>,
    /// 中转目录ID
    container_id: String,
}

impl StagingManager {
    pub fn new(service: Arc<dyn RemoteObjectService>, container_id: impl Into<String>) -> Self {
        Self {
            service,
            container_id: container_id.into(),
        }
    }

    /// 查找已存在的中转副本
    pub async fn find_existing(
        &self,
        descriptor: &FileDescriptor,
    ) -> std::result::Result<Option<String>, DriveError> {
        let tagged = self
            .service
            .list(
                &ListQuery::BySourceId {
                    parent_id: self.container_id.clone(),
                    source_id: descriptor.id.clone(),
                },
                None,
            )
            .await?;
        if tagged.files.len() > 1 {
            warn!(
                "中转目录中存在 {} 个来自同一源文件的副本: {}",
                tagged.files.len(),
                descriptor.name
            );
        }
        if let Some(file) = tagged.files.into_iter().find(|f| is_same_content(f, descriptor)) {
            return Ok(Some(file.id));
        }

        let named = self
            .service
            .list(
                &ListQuery::ByName {
                    parent_id: self.container_id.clone(),
                    name: descriptor.name.clone(),
                },
                None,
            )
            .await?;
        if named.files.len() > 1 {
            warn!(
                "中转目录中存在 {} 个同名文件，按名称匹配可能不准确: {}",
                named.files.len(),
                descriptor.name
            );
        }

        // 标记属于其他源文件的副本可能正被别的任务下载，随后会被删除
        Ok(named
            .files
            .into_iter()
            .filter(|f| f.source_id().map_or(true, |source| source == descriptor.id))
            .find(|f| is_same_content(f, descriptor))
            .map(|f| f.id))
    }

    /// 获取可下载的中转副本ID，不存在时复制一份
    ///
    /// 每次复制消耗一次复制配额；崩溃后重跑会复用已有副本
    pub async fn resolve(&self, descriptor: &FileDescriptor) -> Result<String> {
        let staging_error = |source: DriveError| MirrorError::Staging {
            name: descriptor.name.clone(),
            source,
        };

        if let Some(id) = self.find_existing(descriptor).await.map_err(staging_error)? {
            info!("复用已有中转副本: {} -> {}", descriptor.name, id);
            return Ok(id);
        }

        let id = self
            .service
            .copy(&descriptor.id, &self.container_id)
            .await
            .map_err(staging_error)?;
        info!("已创建中转副本: {} -> {}", descriptor.name, id);
        Ok(id)
    }

    /// 删除中转副本，已不存在视为成功
    pub async fn release(&self, staging_id: &str) -> Result<()> {
        match self.service.delete(staging_id).await {
            Ok(()) => {
                debug!("已删除中转副本: {}", staging_id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("中转副本已不存在: {}", staging_id);
                Ok(())
            }
            Err(source) => Err(MirrorError::Cleanup {
                staging_id: staging_id.to_string(),
                source,
            }),
        }
    }
}

/// 大小一致且（双方都有 MD5 时）MD5 一致
fn is_same_content(candidate: &DriveFile, descriptor: &FileDescriptor) -> bool {
    if let Some(size) = candidate.size_bytes() {
        if size != descriptor.size {
            return false;
        }
    }
    match (&candidate.md5_checksum, &descriptor.content_checksum) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => true,
    }
}
