//! 单文件续传状态机
//!
//! Init → ResolveStage → Downloading → (Verifying) → Done
//!
//! 本地已有文件的大小就是唯一的续传记录。续传的文件下载完成后必须做一次摘要校验
//! （默认 MD5，远程缺少所选算法的摘要时退回 MD5），校验失败则删除本地文件从头下载，
//! 重新下载的次数受 `max_integrity_retries` 限制。一次运行内从零下完的文件不校验。

use crate::config::MirrorConfig;
use crate::drive::{FileDescriptor, RemoteObjectService};
use crate::error::{MirrorError, Result};
use crate::mirror::checksum::{self, DigestAlgorithm};
use crate::mirror::staging::StagingManager;
use crate::mirror::task::{ResumePoint, TaskPhase, TransferTask};
use futures::StreamExt;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 下载选项
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// 本地已完整的文件也做校验
    pub verify_existing: bool,
    /// 校验失败后最多重新下载次数
    pub max_integrity_retries: u32,
    /// 校验读取缓冲区大小
    pub checksum_buffer_bytes: usize,
    pub checksum_algorithm: DigestAlgorithm,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from(&MirrorConfig::default())
    }
}

impl From<&MirrorConfig> for DownloadOptions {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            verify_existing: config.verify_existing,
            max_integrity_retries: config.max_integrity_retries,
            checksum_buffer_bytes: config.checksum_buffer_bytes,
            checksum_algorithm: config.checksum_algorithm,
        }
    }
}

/// 单个文件的传输结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    /// 本次从远程拉取的字节数
    pub bytes_fetched: u64,
    /// 校验次数
    pub verifications: u32,
    /// 因校验失败从头重下的次数
    pub restarts: u32,
    /// 本地已是完整文件，未做任何远程请求
    pub skipped: bool,
}

/// 校验结果
enum Verdict {
    Passed,
    Mismatch { expected: String, actual: String },
}

/// 续传下载器
#[derive(Clone)]
pub struct ResumableDownloader {
    service: Arc<dyn RemoteObjectService>,
    /// 为 None 时直接从源文件下载
    staging: Option<StagingManager>,
    options: DownloadOptions,
    cancel: CancellationToken,
}

impl ResumableDownloader {
    pub fn new(
        service: Arc<dyn RemoteObjectService>,
        staging: Option<StagingManager>,
        options: DownloadOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            staging,
            options,
            cancel,
        }
    }

    /// 执行完整流水线
    pub async fn transfer(&self, task: &mut TransferTask) -> Result<TransferOutcome> {
        debug!(
            "任务 {} 开始: {} -> {:?}",
            task.id, task.descriptor.name, task.local_path
        );
        task.set_phase(TaskPhase::Init);
        let resume = self.inspect_local(task).await?;
        self.transfer_from(task, resume).await
    }

    /// 从给定的续传点开始执行
    ///
    /// 无论成功、失败还是取消，返回前都会删除已创建的中转副本
    pub async fn transfer_from(
        &self,
        task: &mut TransferTask,
        resume: ResumePoint,
    ) -> Result<TransferOutcome> {
        task.apply_resume(resume);
        if resume.bytes_on_disk > 0 {
            info!(
                "续传: {}，本地已有 {} / {} bytes",
                task.descriptor.name, task.bytes_on_disk, task.descriptor.size
            );
        }

        let mut outcome = TransferOutcome::default();
        let result = self.run_phases(task, &mut outcome).await;

        if let Some(staging_id) = task.staging_object_id.take() {
            if let Some(staging) = &self.staging {
                if let Err(e) = staging.release(&staging_id).await {
                    warn!("{}（残留的中转副本需手动清理）", e);
                }
            }
        }
        task.set_phase(TaskPhase::Done);

        match &result {
            Ok(_) => info!(
                "✓ 文件完成: {} ({} bytes，本次下载 {} bytes)",
                task.descriptor.name, task.descriptor.size, outcome.bytes_fetched
            ),
            Err(e) if e.is_cancelled() => {
                info!("文件传输已取消: {}，已保留 {} bytes", task.descriptor.name, task.bytes_on_disk)
            }
            Err(_) => {}
        }

        result.map(|_| outcome)
    }

    /// Init：只检查一次本地文件
    async fn inspect_local(&self, task: &TransferTask) -> Result<ResumePoint> {
        let size = task.descriptor.size;
        let path = &task.local_path;

        let len = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ResumePoint::fresh()),
            Err(e) => return Err(MirrorError::io(path, e)),
        };

        if len > size {
            warn!(
                "本地文件比远程文件大，视为损坏并重新下载: {:?} (本地 {} bytes, 远程 {} bytes)",
                path, len, size
            );
            remove_file(path).await?;
            return Ok(ResumePoint {
                bytes_on_disk: 0,
                was_resuming: true,
            });
        }

        let was_resuming = len != size || (self.options.verify_existing && size > 0);
        Ok(ResumePoint {
            bytes_on_disk: len,
            was_resuming,
        })
    }

    async fn run_phases(&self, task: &mut TransferTask, outcome: &mut TransferOutcome) -> Result<()> {
        if let Some(parent) = task.local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::io(parent, e))?;
        }

        if task.descriptor.size == 0 {
            // 空文件无需任何远程请求
            outcome.skipped = tokio::fs::try_exists(&task.local_path)
                .await
                .unwrap_or(false);
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&task.local_path)
                .await
                .map_err(|e| MirrorError::io(&task.local_path, e))?;
            return Ok(());
        }

        if task.is_complete() && !task.was_resuming {
            debug!("本地文件已完整，跳过: {:?}", task.local_path);
            outcome.skipped = true;
            return Ok(());
        }

        loop {
            if !task.is_complete() {
                let source_id = self.resolve_source(task).await?;
                task.set_phase(TaskPhase::Downloading);
                outcome.bytes_fetched += self.fetch_remaining(task, &source_id).await?;
            }

            if !task.was_resuming {
                return Ok(());
            }

            outcome.verifications += 1;
            let (expected, actual) = match self.verify(task).await? {
                Verdict::Passed => return Ok(()),
                Verdict::Mismatch { expected, actual } => (expected, actual),
            };

            // 校验失败：删除本地文件从头下载，续传标记保持不变
            task.integrity_failures += 1;
            remove_file(&task.local_path).await?;
            if task.integrity_failures > self.options.max_integrity_retries {
                error!(
                    "✗ 文件校验连续失败 {} 次，放弃: {}",
                    task.integrity_failures, task.descriptor.name
                );
                task.restart();
                return Err(MirrorError::IntegrityMismatch {
                    name: task.descriptor.name.clone(),
                    expected,
                    actual,
                    attempts: task.integrity_failures,
                });
            }

            warn!(
                "文件校验失败，删除后重新下载 (第 {} 次): {}",
                task.integrity_failures, task.descriptor.name
            );
            task.restart();
            outcome.restarts += 1;
        }
    }

    /// ResolveStage：按需获取下载对象ID，同一任务只解析一次
    async fn resolve_source(&self, task: &mut TransferTask) -> Result<String> {
        if let Some(id) = &task.staging_object_id {
            return Ok(id.clone());
        }

        let Some(staging) = &self.staging else {
            return Ok(task.descriptor.id.clone());
        };

        if self.cancel.is_cancelled() {
            return Err(MirrorError::Cancelled);
        }

        // 复制请求一旦发出就等它返回，拿到副本ID才能在结束时删除
        task.set_phase(TaskPhase::ResolveStage);
        let id = staging.resolve(&task.descriptor).await?;
        task.staging_object_id = Some(id.clone());

        if self.cancel.is_cancelled() {
            return Err(MirrorError::Cancelled);
        }
        Ok(id)
    }

    /// Downloading：从本地已有位置请求剩余字节并追加写入
    ///
    /// 返回本次写入的字节数。传输中断时已写入的数据保留在磁盘上
    async fn fetch_remaining(&self, task: &mut TransferTask, source_id: &str) -> Result<u64> {
        let size = task.descriptor.size;
        let range = task.bytes_on_disk..size;
        debug!(
            "请求范围: {} bytes={}-{}",
            task.descriptor.name, range.start, range.end
        );

        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(MirrorError::Cancelled),
            stream = self.service.get_range(source_id, range) => {
                stream.map_err(|e| MirrorError::transport(&task.descriptor.name, e))?
            }
        };

        // 追加模式，绝不截断已有内容
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&task.local_path)
            .await
            .map_err(|e| MirrorError::io(&task.local_path, e))?;

        let start = task.bytes_on_disk;
        let streamed = self.stream_to_file(task, &mut stream, &mut file).await;
        let flushed = file
            .flush()
            .await
            .map_err(|e| MirrorError::io(&task.local_path, e));
        streamed?;
        flushed?;

        if !task.is_complete() {
            return Err(MirrorError::transport(
                &task.descriptor.name,
                format!(
                    "数据流提前结束: 已有 {} bytes, 期望 {} bytes",
                    task.bytes_on_disk, size
                ),
            ));
        }

        Ok(task.bytes_on_disk - start)
    }

    async fn stream_to_file(
        &self,
        task: &mut TransferTask,
        stream: &mut crate::drive::ByteStream,
        file: &mut File,
    ) -> Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(MirrorError::Cancelled),
                next = stream.next() => next,
            };

            let chunk = match next {
                None => return Ok(()),
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(MirrorError::transport(&task.descriptor.name, e)),
            };

            // 服务端多给的字节直接丢弃，本地大小不会超过远程大小
            let take = (chunk.len() as u64).min(task.remaining_bytes()) as usize;
            if take > 0 {
                file.write_all(&chunk[..take])
                    .await
                    .map_err(|e| MirrorError::io(&task.local_path, e))?;
                task.record_bytes(take as u64);
            }

            if task.is_complete() {
                return Ok(());
            }
        }
    }

    /// Verifying
    async fn verify(&self, task: &mut TransferTask) -> Result<Verdict> {
        let Some((algorithm, expected)) =
            expected_digest(&task.descriptor, self.options.checksum_algorithm)
        else {
            warn!("远程文件没有摘要，跳过校验: {}", task.descriptor.name);
            return Ok(Verdict::Passed);
        };

        task.set_phase(TaskPhase::Verifying);
        let progress = task.progress();
        progress.set_checking(0);
        info!("校验续传文件 ({:?}): {}", algorithm, task.descriptor.name);

        let actual = checksum::digest_file(
            &task.local_path,
            algorithm,
            self.options.checksum_buffer_bytes,
            |checked| progress.set_checking(checked),
            &self.cancel,
        )
        .await?;

        if checksum::checksums_match(&expected, &actual) {
            info!("✅ 校验通过: {}", task.descriptor.name);
            progress.set_bytes(task.bytes_on_disk);
            Ok(Verdict::Passed)
        } else {
            warn!(
                "校验不一致: {} (期望 {}, 实际 {})",
                task.descriptor.name, expected, actual
            );
            Ok(Verdict::Mismatch { expected, actual })
        }
    }
}

/// 按配置选择期望摘要，远程没有该算法的摘要时退回 MD5
fn expected_digest(
    descriptor: &FileDescriptor,
    preferred: DigestAlgorithm,
) -> Option<(DigestAlgorithm, String)> {
    let preferred_value = match preferred {
        DigestAlgorithm::Md5 => &descriptor.content_checksum,
        DigestAlgorithm::Sha1 => &descriptor.sha1_checksum,
        DigestAlgorithm::Sha256 => &descriptor.sha256_checksum,
    };
    if let Some(value) = preferred_value {
        return Some((preferred, value.clone()));
    }
    if preferred != DigestAlgorithm::Md5 {
        debug!("远程文件没有 {:?} 摘要，改用 MD5: {}", preferred, descriptor.name);
    }
    descriptor
        .content_checksum
        .clone()
        .map(|md5| (DigestAlgorithm::Md5, md5))
}

async fn remove_file(path: &std::path::Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MirrorError::io(path, e)),
    }
}
