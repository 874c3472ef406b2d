//! 镜像引擎
//!
//! 列举 → 建队列 → 启动进度报告 → 工作池并发传输 → 停止报告 → 汇总

use crate::config::MirrorConfig;
use crate::drive::RemoteObjectService;
use crate::error::{MirrorError, Result};
use crate::mirror::download::{DownloadOptions, ResumableDownloader};
use crate::mirror::enumerator::DirectoryEnumerator;
use crate::mirror::pool::{JobStatus, WorkerPool};
use crate::mirror::progress::{log_snapshot, InFlightSet, ProgressReporter, ProgressSnapshot};
use crate::mirror::queue::TaskQueue;
use crate::mirror::staging::StagingManager;
use crate::mirror::task::TransferTask;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// 一次运行的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 发现的文件数
    pub discovered: usize,
    /// 下载完成（含续传）
    pub completed: usize,
    /// 本地已完整，跳过
    pub skipped: usize,
    pub failed: usize,
    /// 进行中被取消
    pub cancelled: usize,
    /// 取消时尚未开始
    pub not_started: usize,
}

impl RunSummary {
    /// 所有文件都已就绪
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0 && self.not_started == 0
    }
}

/// 镜像引擎
pub struct MirrorEngine {
    service: Arc<dyn RemoteObjectService>,
    config: MirrorConfig,
    cancel: CancellationToken,
}

impl MirrorEngine {
    pub fn new(service: Arc<dyn RemoteObjectService>, config: MirrorConfig) -> Self {
        Self {
            service,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// 使用外部取消令牌（例如 Ctrl+C 处理）
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 按配置中的根目录、保存目录、中转目录和并发数运行
    pub async fn run_configured(&self) -> Result<RunSummary> {
        let config = &self.config;
        self.run(
            &config.root_id,
            &config.destination,
            &config.staging_container_id,
            config.concurrency,
        )
        .await
    }

    /// 镜像远程目录到本地，直到全部文件处理完或运行被取消
    ///
    /// 只有列举失败（或列举阶段被取消）会返回错误，单个文件的失败计入统计
    pub async fn run(
        &self,
        root_id: &str,
        destination: &Path,
        staging_container_id: &str,
        concurrency: usize,
    ) -> Result<RunSummary> {
        let started_at = Instant::now();

        let staging = if self.config.bypass_quota {
            if staging_container_id.trim().is_empty() {
                return Err(MirrorError::Config(
                    "启用中转复制时必须提供中转目录ID".to_string(),
                ));
            }
            Some(StagingManager::new(
                Arc::clone(&self.service),
                staging_container_id,
            ))
        } else {
            info!("未启用中转复制，直接从源文件下载");
            None
        };

        info!("开始列举远程目录: {}", root_id);
        let enumerator = DirectoryEnumerator::new(
            Arc::clone(&self.service),
            self.config.recursive,
            self.cancel.clone(),
        );
        let files = enumerator.enumerate(root_id).await?;
        let discovered = files.len();

        let queue = Arc::new(TaskQueue::new(files));
        let in_flight = Arc::new(InFlightSet::new());
        let reporter = ProgressReporter::start(
            Duration::from_millis(self.config.progress_interval_ms),
            discovered,
            Arc::clone(&queue),
            Arc::clone(&in_flight),
        );

        let downloader = ResumableDownloader::new(
            Arc::clone(&self.service),
            staging,
            DownloadOptions::from(&self.config),
            self.cancel.clone(),
        );
        let destination = destination.to_path_buf();
        let job_in_flight = Arc::clone(&in_flight);

        let pool = WorkerPool::new(concurrency, self.cancel.clone());
        let pool_summary = pool
            .run(Arc::clone(&queue), move |descriptor| {
                let downloader = downloader.clone();
                let destination = destination.clone();
                let in_flight = Arc::clone(&job_in_flight);

                async move {
                    let mut task = TransferTask::new(descriptor, &destination);
                    let _guard = in_flight.register(task.progress());
                    let span = info_span!("transfer", task_id = %task.id);
                    let outcome = downloader.transfer(&mut task).instrument(span).await?;
                    Ok(if outcome.skipped {
                        JobStatus::Skipped
                    } else {
                        JobStatus::Transferred
                    })
                }
            })
            .await;

        reporter.stop().await;
        log_snapshot(&ProgressSnapshot::capture(discovered, &queue, &in_flight));

        let summary = RunSummary {
            discovered,
            completed: pool_summary.completed,
            skipped: pool_summary.skipped,
            failed: pool_summary.failed,
            cancelled: pool_summary.cancelled,
            not_started: queue.remaining(),
        };

        if self.cancel.is_cancelled() {
            warn!(
                "运行已取消: 进行中 {} 个被中断，{} 个未开始",
                summary.cancelled, summary.not_started
            );
        }
        info!(
            "镜像结束，耗时 {:.1}s: 发现 {}，完成 {}，跳过 {}，失败 {}",
            started_at.elapsed().as_secs_f64(),
            summary.discovered,
            summary.completed,
            summary.skipped,
            summary.failed
        );

        Ok(summary)
    }
}
