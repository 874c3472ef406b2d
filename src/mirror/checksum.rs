//! 文件完整性校验
//!
//! 流式计算摘要，按缓冲区大小分块读取，不会把整个文件读入内存

use crate::error::{MirrorError, Result};
use md5::Context as Md5Context;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 摘要算法
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha1,
    Sha256,
}

enum Hasher {
    Md5(Md5Context),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Hasher::Md5(Md5Context::new()),
            DigestAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    /// 小写十六进制
    fn finish(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// 计算数据流的摘要
///
/// `on_progress` 在每块读取后收到累计字节数
pub async fn digest_reader<R, F>(
    mut reader: R,
    algorithm: DigestAlgorithm,
    buffer_size: usize,
    mut on_progress: F,
) -> io::Result<String>
where
    R: AsyncRead + Unpin,
    F: FnMut(u64),
{
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
        on_progress(total);
    }

    Ok(hasher.finish())
}

/// 计算本地文件的摘要，可被取消
pub async fn digest_file<F>(
    path: &Path,
    algorithm: DigestAlgorithm,
    buffer_size: usize,
    on_progress: F,
    cancel: &CancellationToken,
) -> Result<String>
where
    F: FnMut(u64),
{
    let file = File::open(path)
        .await
        .map_err(|e| MirrorError::io(path, e))?;

    let digest = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(MirrorError::Cancelled),
        result = digest_reader(file, algorithm, buffer_size, on_progress) => {
            result.map_err(|e| MirrorError::io(path, e))?
        }
    };

    debug!("文件摘要计算完成: {:?}, {:?}={}", path, algorithm, digest);
    Ok(digest)
}

/// 计算内存数据的摘要
pub fn digest_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finish()
}

/// 比较两个十六进制摘要（忽略大小写和首尾空白）
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
