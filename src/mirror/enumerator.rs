//! 远程目录列举
//!
//! 从根目录开始按层遍历，每个目录的子项分页列举直到没有下一页。
//! 同一文件可能挂在多个父目录下，只保留第一次遇到的那份。
//!
//! Drive 允许同一目录下有同名条目，本地不行。一个目录列举完后，本地名称
//! （清理分隔符后，忽略大小写）重复的文件和子目录都加上 ` (ID)` 后缀，
//! 结果与列举顺序无关。

use crate::drive::{DriveFile, FileDescriptor, ListQuery, RemoteObjectService};
use crate::error::{MirrorError, Result};
use crate::mirror::task::sanitize_file_name;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 目录列举器
pub struct DirectoryEnumerator {
    service: Arc<dyn RemoteObjectService>,
    /// 是否进入子目录
    recursive: bool,
    cancel: CancellationToken,
}

impl DirectoryEnumerator {
    pub fn new(
        service: Arc<dyn RemoteObjectService>,
        recursive: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            recursive,
            cancel,
        }
    }

    /// 列出根目录下所有可下载的二进制文件
    ///
    /// 任意一页列举失败都会使整个列举失败
    pub async fn enumerate(&self, root_id: &str) -> Result<Vec<FileDescriptor>> {
        let mut pending: VecDeque<(String, PathBuf)> = VecDeque::new();
        let mut visited_folders: HashSet<String> = HashSet::new();
        let mut seen_files: HashSet<String> = HashSet::new();
        let mut files = Vec::new();

        visited_folders.insert(root_id.to_string());
        pending.push_back((root_id.to_string(), PathBuf::new()));

        while let Some((folder_id, relative_dir)) = pending.pop_front() {
            let entries = self.list_children(&folder_id).await?;

            let mut subfolders: Vec<DriveFile> = Vec::new();
            let mut folder_files: Vec<FileDescriptor> = Vec::new();
            for file in entries {
                if file.is_folder() {
                    if !self.recursive {
                        continue;
                    }
                    if visited_folders.insert(file.id.clone()) {
                        subfolders.push(file);
                    } else {
                        debug!("目录已访问过，跳过: {} ({})", file.name, file.id);
                    }
                    continue;
                }

                let Some(descriptor) = FileDescriptor::from_drive_file(&file, relative_dir.clone())
                else {
                    warn!(
                        "跳过无法直接下载的文件: {} ({})",
                        file.name, file.mime_type
                    );
                    continue;
                };

                if seen_files.insert(descriptor.id.clone()) {
                    folder_files.push(descriptor);
                }
            }

            let names = LocalNames::new(
                subfolders
                    .iter()
                    .map(|f| f.name.as_str())
                    .chain(folder_files.iter().map(|f| f.name.as_str())),
            );

            for folder in subfolders {
                let mut dir = relative_dir.clone();
                dir.push(names.folder_name(&folder.name, &folder.id));
                pending.push_back((folder.id, dir));
            }

            for mut descriptor in folder_files {
                descriptor.local_name = names.file_name(&descriptor.name, &descriptor.id);
                files.push(descriptor);
                info!("已发现文件: {}", files.len());
            }
        }

        info!("列举完成，共 {} 个文件", files.len());
        Ok(files)
    }

    /// 分页列出一个目录的全部子项
    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let query = ListQuery::Children {
            parent_id: folder_id.to_string(),
        };
        let mut page_token: Option<String> = None;
        let mut entries = Vec::new();

        loop {
            if self.cancel.is_cancelled() {
                info!("列举已取消");
                return Err(MirrorError::Cancelled);
            }

            let page = self
                .service
                .list(&query, page_token.as_deref())
                .await
                .map_err(MirrorError::Enumeration)?;
            entries.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(entries),
            }
        }
    }
}

/// 一个目录内的本地名称分配
struct LocalNames {
    counts: HashMap<String, usize>,
}

impl LocalNames {
    fn new<'a>(names: impl Iterator<Item = &'a str>) -> Self {
        let mut counts = HashMap::new();
        for name in names {
            *counts.entry(collision_key(&sanitize_file_name(name))).or_insert(0) += 1;
        }
        Self { counts }
    }

    fn is_shared(&self, local: &str) -> bool {
        self.counts.get(&collision_key(local)).copied().unwrap_or(0) > 1
    }

    /// 文件：`name (id).ext`
    fn file_name(&self, name: &str, id: &str) -> String {
        let local = sanitize_file_name(name);
        if !self.is_shared(&local) {
            return local;
        }
        let suffixed = match local.rfind('.') {
            Some(dot) if dot > 0 => format!("{} ({}){}", &local[..dot], id, &local[dot..]),
            _ => format!("{} ({})", local, id),
        };
        debug!("同目录文件重名，本地保存为: {}", suffixed);
        sanitize_file_name(&suffixed)
    }

    /// 目录：`name (id)`
    fn folder_name(&self, name: &str, id: &str) -> String {
        let local = sanitize_file_name(name);
        if !self.is_shared(&local) {
            return local;
        }
        debug!("同目录子目录重名: {} ({})", local, id);
        sanitize_file_name(&format!("{} ({})", local, id))
    }
}

fn collision_key(local: &str) -> String {
    local.to_lowercase()
}
