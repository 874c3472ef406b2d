// Google Drive v3 客户端实现

use crate::config::DriveConfig;
use crate::drive::{ByteStream, DriveError, FileListPage, ListQuery, RemoteObjectService, SOURCE_ID_PROPERTY};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::ops::Range;
use std::time::Duration;
use tracing::{debug, info};

/// 列表接口需要返回的字段
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, parents, md5Checksum, \
     sha1Checksum, sha256Checksum, size, appProperties)";

/// Drive 客户端
#[derive(Debug, Clone)]
pub struct DriveClient {
    /// HTTP客户端
    client: Client,
    /// API 根地址（不含末尾斜杠）
    api_base: String,
    /// OAuth 访问令牌
    access_token: String,
    /// 每页条目数
    page_size: u32,
    /// 元数据请求超时（媒体下载不设总超时）
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

impl DriveClient {
    /// 创建新的 Drive 客户端
    ///
    /// # 参数
    /// * `config` - Drive 配置
    /// * `access_token` - 已获取的访问令牌（令牌获取与刷新不在本客户端范围内）
    pub fn new(config: &DriveConfig, access_token: String) -> Result<Self, DriveError> {
        // 大文件下载可能持续数小时，只限制连接建立时间
        let client = Client::builder()
            .user_agent(concat!("drive-mirror/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()?;

        info!("初始化 Drive 客户端: api_base={}", config.api_base);

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            access_token,
            page_size: config.page_size,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.api_base)
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.api_base, id)
    }

    /// 非 2xx 响应转换为 API 错误，优先取 `error.message`
    async fn check_status(response: Response) -> Result<Response, DriveError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(body);

        Err(DriveError::Api { status, message })
    }
}

#[async_trait]
impl RemoteObjectService for DriveClient {
    async fn list(
        &self,
        query: &ListQuery,
        page_token: Option<&str>,
    ) -> Result<FileListPage, DriveError> {
        let q = query.to_query_string();
        let page_size = self.page_size.to_string();
        debug!("列出文件: q={}, page_token={:?}", q, page_token);

        let mut request = self
            .client
            .get(self.files_url())
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .query(&[
                ("q", q.as_str()),
                ("fields", LIST_FIELDS),
                ("pageSize", page_size.as_str()),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = Self::check_status(request.send().await?).await?;
        let page: FileListPage = response
            .json()
            .await
            .map_err(|e| DriveError::Decode(e.to_string()))?;

        debug!("获取到 {} 个条目", page.files.len());
        Ok(page)
    }

    async fn copy(&self, object_id: &str, destination: &str) -> Result<String, DriveError> {
        info!("复制文件到中转目录: {} -> {}", object_id, destination);

        let body = json!({
            "parents": [destination],
            "appProperties": { SOURCE_ID_PROPERTY: object_id },
        });

        let response = self
            .client
            .post(format!("{}/copy", self.file_url(object_id)))
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .query(&[("supportsAllDrives", "true"), ("fields", "id")])
            .json(&body)
            .send()
            .await?;

        let created: CreatedFile = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| DriveError::Decode(e.to_string()))?;

        Ok(created.id)
    }

    async fn get_range(
        &self,
        object_id: &str,
        range: Range<u64>,
    ) -> Result<ByteStream, DriveError> {
        let range_header = format!("bytes={}-{}", range.start, range.end);
        debug!("范围下载: id={}, {}", object_id, range_header);

        let response = self
            .client
            .get(self.file_url(object_id))
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .header(RANGE, range_header)
            .send()
            .await?;

        let response = Self::check_status(response).await?;

        // 从中间续传时必须拿到 206，否则追加写入会破坏文件
        if range.start > 0 && response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(DriveError::Api {
                status: response.status().as_u16(),
                message: "服务器未按 Range 返回部分内容".to_string(),
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(DriveError::from))
            .boxed())
    }

    async fn delete(&self, object_id: &str) -> Result<(), DriveError> {
        debug!("删除文件: {}", object_id);

        let response = self
            .client
            .delete(self.file_url(object_id))
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .query(&[("supportsAllDrives", "true")])
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> DriveClient {
        let config = DriveConfig {
            api_base: server.uri(),
            ..DriveConfig::default()
        };
        DriveClient::new(&config, "test-token".to_string()).unwrap()
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<_> = stream.collect().await;
        chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect()
    }

    #[tokio::test]
    async fn test_list_sends_query_and_page_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(header("authorization", "Bearer test-token"))
            .and(query_param("q", "'root' in parents and trashed = false"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": "a", "name": "a.bin", "mimeType": "application/octet-stream", "size": "3"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let page = client
            .list(
                &ListQuery::Children {
                    parent_id: "root".to_string(),
                },
                Some("p2"),
            )
            .await
            .unwrap();

        assert_eq!(page.files.len(), 1);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_get_range_sends_range_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/obj1"))
            .and(query_param("alt", "media"))
            .and(header("range", "bytes=4-10"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"456789".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let stream = client.get_range("obj1", 4..10).await.unwrap();
        assert_eq!(collect(stream).await, b"456789");
    }

    #[tokio::test]
    async fn test_get_range_rejects_full_body_on_resume() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/obj1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert!(client.get_range("obj1", 4..10).await.is_err());
        // 从 0 开始时 200 是合法的
        assert!(client.get_range("obj1", 0..10).await.is_ok());
    }

    #[tokio::test]
    async fn test_copy_tags_source_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/src1/copy"))
            .and(body_partial_json(json!({
                "parents": ["stage"],
                "appProperties": { "mirrorSourceId": "src1" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "copy1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.copy("src1", "stage").await.unwrap(), "copy1");
    }

    #[tokio::test]
    async fn test_api_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/files/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "File not found: gone."}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.delete("gone").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("File not found: gone."));
    }
}
