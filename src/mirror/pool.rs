//! 固定槽位工作池
//!
//! 启动 N 个槽位，每个槽位循环从队列取文件并执行，直到队列为空或运行被取消。
//! 单个文件的失败（包括 panic）只计数，不影响其他槽位。

use crate::drive::FileDescriptor;
use crate::error::Result;
use crate::mirror::queue::TaskQueue;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单个文件的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// 已下载（或已续传并校验）
    Transferred,
    /// 本地已完整，无需处理
    Skipped,
}

/// 工作池运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl PoolSummary {
    fn merge(&mut self, other: &PoolSummary) {
        self.completed += other.completed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }

    /// 已结束的文件数
    pub fn finished(&self) -> usize {
        self.completed + self.skipped + self.failed + self.cancelled
    }
}

/// 工作池
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        let concurrency = if concurrency == 0 {
            warn!("并发数为 0，按 1 处理");
            1
        } else {
            concurrency
        };
        Self {
            concurrency,
            cancel,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 运行到队列取空或被取消
    ///
    /// 每个文件在独立的 tokio 任务中执行，panic 计为失败
    pub async fn run<F, Fut>(&self, queue: Arc<TaskQueue>, job: F) -> PoolSummary
    where
        F: Fn(FileDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JobStatus>> + Send + 'static,
    {
        let job = Arc::new(job);
        info!(
            "工作池启动: {} 个槽位，待处理 {} 个文件",
            self.concurrency,
            queue.remaining()
        );

        let slots = (0..self.concurrency).map(|slot| {
            let queue = Arc::clone(&queue);
            let job = Arc::clone(&job);
            let cancel = self.cancel.clone();

            tokio::spawn(async move {
                let mut summary = PoolSummary::default();

                loop {
                    if cancel.is_cancelled() {
                        debug!("槽位 #{} 检测到取消，停止取任务", slot);
                        break;
                    }
                    let Some(descriptor) = queue.pop() else {
                        break;
                    };

                    let name = descriptor.name.clone();
                    debug!("槽位 #{} 开始: {}", slot, name);

                    match tokio::spawn(job(descriptor)).await {
                        Ok(Ok(JobStatus::Transferred)) => summary.completed += 1,
                        Ok(Ok(JobStatus::Skipped)) => summary.skipped += 1,
                        Ok(Err(e)) if e.is_cancelled() => summary.cancelled += 1,
                        Ok(Err(e)) => {
                            error!("✗ 文件传输失败: {}: {}", name, e);
                            summary.failed += 1;
                        }
                        Err(e) => {
                            error!("✗ 文件传输任务异常退出: {}: {}", name, e);
                            summary.failed += 1;
                        }
                    }
                }

                debug!("槽位 #{} 退出", slot);
                summary
            })
        });

        let mut total = PoolSummary::default();
        for result in join_all(slots).await {
            match result {
                Ok(summary) => total.merge(&summary),
                Err(e) => error!("工作槽位异常退出: {}", e),
            }
        }

        info!(
            "工作池结束: 完成 {}，跳过 {}，失败 {}，取消 {}",
            total.completed, total.skipped, total.failed, total.cancelled
        );
        total
    }
}
