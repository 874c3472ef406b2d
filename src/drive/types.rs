// Drive API 数据类型

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// 文件夹的 MIME 类型
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Google 原生文档（Docs/Sheets 等）的 MIME 前缀，这类文件没有字节大小，无法直接下载
pub const GOOGLE_APPS_MIME_PREFIX: &str = "application/vnd.google-apps.";

/// 中转副本上记录源文件 ID 的 appProperties 键
pub const SOURCE_ID_PROPERTY: &str = "mirrorSourceId";

/// Drive 返回的文件条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// 文件ID
    pub id: String,

    /// 文件名
    pub name: String,

    /// MIME 类型
    #[serde(default)]
    pub mime_type: String,

    /// 父目录ID列表
    #[serde(default)]
    pub parents: Vec<String>,

    /// MD5（仅二进制文件有效）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_checksum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1_checksum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_checksum: Option<String>,

    /// 文件大小（Drive 以字符串形式返回 int64）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// 应用私有属性，中转副本在这里记录源文件ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_properties: Option<BTreeMap<String, String>>,
}

impl DriveFile {
    /// 是否是文件夹
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// 是否是 Google 原生文档
    pub fn is_native_document(&self) -> bool {
        !self.is_folder() && self.mime_type.starts_with(GOOGLE_APPS_MIME_PREFIX)
    }

    /// 解析文件大小
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }

    /// 中转副本标记的源文件ID，未标记返回 None
    pub fn source_id(&self) -> Option<&str> {
        self.app_properties
            .as_ref()
            .and_then(|props| props.get(SOURCE_ID_PROPERTY))
            .map(String::as_str)
    }
}

/// 文件列表分页
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListPage {
    /// 当前页的文件
    #[serde(default)]
    pub files: Vec<DriveFile>,

    /// 下一页令牌，缺失表示已到末尾
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// 列表查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListQuery {
    /// 列出目录下的全部条目
    Children { parent_id: String },
    /// 按文件名查找目录下的条目
    ByName { parent_id: String, name: String },
    /// 按源文件ID标记查找目录下的中转副本
    BySourceId { parent_id: String, source_id: String },
}

impl ListQuery {
    /// 转换为 Drive 查询语法（`q` 参数）
    pub fn to_query_string(&self) -> String {
        match self {
            ListQuery::Children { parent_id } => {
                format!("'{}' in parents and trashed = false", escape_query(parent_id))
            }
            ListQuery::ByName { parent_id, name } => format!(
                "'{}' in parents and name = '{}' and trashed = false",
                escape_query(parent_id),
                escape_query(name)
            ),
            ListQuery::BySourceId {
                parent_id,
                source_id,
            } => format!(
                "'{}' in parents and appProperties has {{ key='{}' and value='{}' }} and trashed = false",
                escape_query(parent_id),
                SOURCE_ID_PROPERTY,
                escape_query(source_id)
            ),
        }
    }
}

/// 转义查询字符串中的反斜杠和单引号
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// 待镜像的远程文件描述（列举后不再变化）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// 远程文件ID（唯一标识）
    pub id: String,
    /// 文件名
    pub name: String,
    /// 父目录ID集合
    pub parent_ids: BTreeSet<String>,
    /// 内容 MD5（小写十六进制），原生文档等没有校验值
    pub content_checksum: Option<String>,
    pub sha1_checksum: Option<String>,
    pub sha256_checksum: Option<String>,
    /// 文件大小（字节）
    pub size: u64,
    /// MIME 类型
    pub mime_type: String,
    /// 所在目录相对镜像根目录的路径，根目录下的文件为空
    pub relative_dir: PathBuf,
    /// 本地文件名。默认同远程文件名，同目录重名时由列举器加上ID后缀
    pub local_name: String,
}

impl FileDescriptor {
    /// 从 Drive 条目构建，没有大小的条目（文件夹、原生文档）返回 None
    pub fn from_drive_file(file: &DriveFile, relative_dir: PathBuf) -> Option<Self> {
        if file.is_folder() {
            return None;
        }
        let size = file.size_bytes()?;
        Some(Self {
            id: file.id.clone(),
            name: file.name.clone(),
            parent_ids: file.parents.iter().cloned().collect(),
            content_checksum: lowercase(&file.md5_checksum),
            sha1_checksum: lowercase(&file.sha1_checksum),
            sha256_checksum: lowercase(&file.sha256_checksum),
            size,
            mime_type: file.mime_type.clone(),
            relative_dir,
            local_name: file.name.clone(),
        })
    }
}

fn lowercase(checksum: &Option<String>) -> Option<String> {
    checksum.as_ref().map(|s| s.to_ascii_lowercase())
}
