// 测试用内存远程服务：记录每次调用，可注入故障

use crate::drive::{
    ByteStream, DriveError, DriveFile, FileDescriptor, FileListPage, ListQuery,
    RemoteObjectService, FOLDER_MIME_TYPE, SOURCE_ID_PROPERTY,
};
use crate::mirror::checksum::{digest_bytes, DigestAlgorithm};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

/// 记录的远程调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    List(ListQuery),
    Copy { object_id: String, destination: String },
    Get { object_id: String, range: Range<u64> },
    Delete(String),
}

#[derive(Debug, Clone)]
struct MockObject {
    id: String,
    name: String,
    parent: String,
    mime_type: String,
    content: Option<Vec<u8>>,
    source_id: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    objects: Vec<MockObject>,
    calls: Vec<RemoteCall>,
    next_copy: usize,
    page_size: usize,
    stream_chunk: usize,
    fail_list: bool,
    fail_copy: bool,
    fail_delete: bool,
    fail_stream_after: Option<usize>,
    get_latency: Option<Duration>,
    copy_latency: Option<Duration>,
}

pub struct MockRemoteService {
    state: Mutex<MockState>,
}

impl Default for MockRemoteService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                page_size: 1000,
                stream_chunk: 7,
                ..MockState::default()
            }),
        }
    }

    pub fn add_folder(&self, id: &str, name: &str, parent: &str) {
        self.state.lock().objects.push(MockObject {
            id: id.to_string(),
            name: name.to_string(),
            parent: parent.to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            content: None,
            source_id: None,
        });
    }

    /// 添加二进制文件，返回对应的文件描述
    pub fn add_file(&self, id: &str, name: &str, parent: &str, content: &[u8]) -> FileDescriptor {
        self.state.lock().objects.push(MockObject {
            id: id.to_string(),
            name: name.to_string(),
            parent: parent.to_string(),
            mime_type: "application/octet-stream".to_string(),
            content: Some(content.to_vec()),
            source_id: None,
        });
        descriptor_for(id, name, parent, content)
    }

    /// 添加没有字节内容的原生文档
    pub fn add_native_document(&self, id: &str, name: &str, parent: &str) {
        self.state.lock().objects.push(MockObject {
            id: id.to_string(),
            name: name.to_string(),
            parent: parent.to_string(),
            mime_type: "application/vnd.google-apps.document".to_string(),
            content: None,
            source_id: None,
        });
    }

    /// 添加一个旧版本留下的中转副本（没有源ID标记）
    pub fn add_untagged_copy(&self, id: &str, name: &str, container: &str, content: &[u8]) {
        self.state.lock().objects.push(MockObject {
            id: id.to_string(),
            name: name.to_string(),
            parent: container.to_string(),
            mime_type: "application/octet-stream".to_string(),
            content: Some(content.to_vec()),
            source_id: None,
        });
    }

    pub fn set_page_size(&self, size: usize) {
        self.state.lock().page_size = size.max(1);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.state.lock().fail_list = fail;
    }

    pub fn set_fail_copy(&self, fail: bool) {
        self.state.lock().fail_copy = fail;
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.state.lock().fail_delete = fail;
    }

    /// 下一次读取在输出 n 字节后中断
    pub fn fail_next_stream_after(&self, bytes: usize) {
        self.state.lock().fail_stream_after = Some(bytes);
    }

    pub fn set_get_latency(&self, latency: Duration) {
        self.state.lock().get_latency = Some(latency);
    }

    /// 复制请求在服务端完成前的耗时
    pub fn set_copy_latency(&self, latency: Duration) {
        self.state.lock().copy_latency = Some(latency);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn get_ranges(&self) -> Vec<Range<u64>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::Get { range, .. } => Some(range),
                _ => None,
            })
            .collect()
    }

    pub fn copy_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RemoteCall::Copy { .. }))
            .count()
    }

    pub fn delete_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RemoteCall::Delete(_)))
            .count()
    }

    /// 容器内现存对象ID
    pub fn objects_in(&self, container: &str) -> Vec<String> {
        self.state
            .lock()
            .objects
            .iter()
            .filter(|o| o.parent == container)
            .map(|o| o.id.clone())
            .collect()
    }

    fn matches(object: &MockObject, query: &ListQuery) -> bool {
        match query {
            ListQuery::Children { parent_id } => &object.parent == parent_id,
            ListQuery::ByName { parent_id, name } => {
                &object.parent == parent_id && &object.name == name
            }
            ListQuery::BySourceId {
                parent_id,
                source_id,
            } => &object.parent == parent_id && object.source_id.as_ref() == Some(source_id),
        }
    }
}

pub fn descriptor_for(id: &str, name: &str, parent: &str, content: &[u8]) -> FileDescriptor {
    FileDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        parent_ids: [parent.to_string()].into_iter().collect(),
        content_checksum: Some(digest_bytes(DigestAlgorithm::Md5, content)),
        sha1_checksum: Some(digest_bytes(DigestAlgorithm::Sha1, content)),
        sha256_checksum: Some(digest_bytes(DigestAlgorithm::Sha256, content)),
        size: content.len() as u64,
        mime_type: "application/octet-stream".to_string(),
        relative_dir: PathBuf::new(),
        local_name: name.to_string(),
    }
}

fn to_drive_file(object: &MockObject) -> DriveFile {
    let digest = |algorithm| {
        object
            .content
            .as_ref()
            .map(|c| digest_bytes(algorithm, c))
    };
    DriveFile {
        id: object.id.clone(),
        name: object.name.clone(),
        mime_type: object.mime_type.clone(),
        parents: vec![object.parent.clone()],
        md5_checksum: digest(DigestAlgorithm::Md5),
        sha1_checksum: digest(DigestAlgorithm::Sha1),
        sha256_checksum: digest(DigestAlgorithm::Sha256),
        size: object.content.as_ref().map(|c| c.len().to_string()),
        app_properties: object.source_id.as_ref().map(|source| {
            [(SOURCE_ID_PROPERTY.to_string(), source.clone())]
                .into_iter()
                .collect()
        }),
    }
}

fn api_error(status: u16, message: &str) -> DriveError {
    DriveError::Api {
        status,
        message: message.to_string(),
    }
}

#[async_trait]
impl RemoteObjectService for MockRemoteService {
    async fn list(
        &self,
        query: &ListQuery,
        page_token: Option<&str>,
    ) -> Result<FileListPage, DriveError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::List(query.clone()));
        if state.fail_list {
            return Err(api_error(500, "list failed"));
        }

        let matched: Vec<&MockObject> = state
            .objects
            .iter()
            .filter(|o| Self::matches(o, query))
            .collect();
        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (offset + state.page_size).min(matched.len());

        let files = matched[offset.min(end)..end]
            .iter()
            .map(|o| to_drive_file(o))
            .collect();

        Ok(FileListPage {
            files,
            next_page_token: (end < matched.len()).then(|| end.to_string()),
        })
    }

    async fn copy(&self, object_id: &str, destination: &str) -> Result<String, DriveError> {
        let latency = self.state.lock().copy_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Copy {
            object_id: object_id.to_string(),
            destination: destination.to_string(),
        });
        if state.fail_copy {
            return Err(api_error(403, "userRateLimitExceeded"));
        }

        let source = state
            .objects
            .iter()
            .find(|o| o.id == object_id)
            .cloned()
            .ok_or_else(|| api_error(404, "source not found"))?;

        state.next_copy += 1;
        let id = format!("copy-{}", state.next_copy);
        state.objects.push(MockObject {
            id: id.clone(),
            name: source.name,
            parent: destination.to_string(),
            mime_type: source.mime_type,
            content: source.content,
            source_id: Some(object_id.to_string()),
        });
        Ok(id)
    }

    async fn get_range(
        &self,
        object_id: &str,
        range: Range<u64>,
    ) -> Result<ByteStream, DriveError> {
        let (content, chunk, fail_after, latency) = {
            let mut state = self.state.lock();
            state.calls.push(RemoteCall::Get {
                object_id: object_id.to_string(),
                range: range.clone(),
            });
            let content = state
                .objects
                .iter()
                .find(|o| o.id == object_id)
                .and_then(|o| o.content.clone())
                .ok_or_else(|| api_error(404, "object not found"))?;
            (
                content,
                state.stream_chunk,
                state.fail_stream_after.take(),
                state.get_latency,
            )
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        // Range 结束位置按 HTTP 语义是闭区间，超出部分截断到文件末尾
        let start = (range.start as usize).min(content.len());
        let end = (range.end as usize).saturating_add(1).min(content.len());
        let mut body = content[start..end.max(start)].to_vec();
        let truncated = match fail_after {
            Some(n) if n < body.len() => {
                body.truncate(n);
                true
            }
            _ => false,
        };

        let mut items: Vec<Result<Bytes, DriveError>> = body
            .chunks(chunk)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if truncated {
            items.push(Err(DriveError::Decode("connection reset".to_string())));
        }

        Ok(futures::stream::iter(items).boxed())
    }

    async fn delete(&self, object_id: &str) -> Result<(), DriveError> {
        let mut state = self.state.lock();
        state.calls.push(RemoteCall::Delete(object_id.to_string()));
        if state.fail_delete {
            return Err(api_error(500, "delete failed"));
        }
        let before = state.objects.len();
        state.objects.retain(|o| o.id != object_id);
        if state.objects.len() == before {
            return Err(api_error(404, "object not found"));
        }
        Ok(())
    }
}
