//! 进度快照与定时报告
//!
//! 工作槽只更新自己任务的 `TaskProgress`，报告器按固定间隔复制一份快照输出，
//! 读锁只在复制期间持有

use crate::mirror::queue::TaskQueue;
use crate::mirror::task::{format_percent, TaskPhase};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 单个任务的共享进度
#[derive(Debug)]
pub struct TaskProgress {
    name: String,
    size: u64,
    bytes_on_disk: AtomicU64,
    phase: Mutex<TaskPhase>,
    label: Mutex<String>,
}

impl TaskProgress {
    pub fn new(name: String, size: u64) -> Self {
        Self {
            name,
            size,
            bytes_on_disk: AtomicU64::new(0),
            phase: Mutex::new(TaskPhase::Init),
            label: Mutex::new(format_percent(0, size)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes_on_disk(&self) -> u64 {
        self.bytes_on_disk.load(Ordering::Relaxed)
    }

    pub fn phase(&self) -> TaskPhase {
        *self.phase.lock()
    }

    pub fn set_phase(&self, phase: TaskPhase) {
        *self.phase.lock() = phase;
    }

    pub fn label(&self) -> String {
        self.label.lock().clone()
    }

    /// 更新下载进度
    pub fn set_bytes(&self, bytes: u64) {
        self.bytes_on_disk.store(bytes, Ordering::Relaxed);
        *self.label.lock() = format_percent(bytes, self.size);
    }

    /// 更新校验进度
    pub fn set_checking(&self, checked: u64) {
        *self.label.lock() = format!("校验中 {}", format_percent(checked, self.size));
    }
}

/// 活跃任务快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTask {
    pub name: String,
    pub progress_label: String,
    pub phase: TaskPhase,
}

/// 进行中的任务集合
#[derive(Debug, Default)]
pub struct InFlightSet {
    /// 按开始顺序排列
    tasks: RwLock<BTreeMap<u64, Arc<TaskProgress>>>,
    next_key: AtomicU64,
    /// 历史最大同时进行数
    peak: AtomicUsize,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记任务，返回的守卫被丢弃时自动移除
    pub fn register(self: &Arc<Self>, progress: Arc<TaskProgress>) -> InFlightGuard {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let len = {
            let mut tasks = self.tasks.write();
            tasks.insert(key, progress);
            tasks.len()
        };
        self.peak.fetch_max(len, Ordering::Relaxed);

        InFlightGuard {
            set: Arc::clone(self),
            key,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<ActiveTask> {
        let tasks: Vec<Arc<TaskProgress>> = self.tasks.read().values().cloned().collect();
        tasks
            .iter()
            .map(|t| ActiveTask {
                name: t.name().to_string(),
                progress_label: t.label(),
                phase: t.phase(),
            })
            .collect()
    }
}

/// 在集合中的登记，丢弃即移除
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<InFlightSet>,
    key: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.tasks.write().remove(&self.key);
    }
}

/// 整体进度快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// 发现的文件总数
    pub total_discovered: usize,
    /// 尚未开始的文件数
    pub remaining: usize,
    /// 进行中的任务
    pub active: Vec<ActiveTask>,
}

impl ProgressSnapshot {
    pub fn capture(total_discovered: usize, queue: &TaskQueue, in_flight: &InFlightSet) -> Self {
        Self {
            total_discovered,
            remaining: queue.remaining(),
            active: in_flight.snapshot(),
        }
    }

    /// 已开始（含已结束）的文件数
    pub fn started(&self) -> usize {
        self.total_discovered.saturating_sub(self.remaining)
    }
}

/// 输出到日志
pub fn log_snapshot(snapshot: &ProgressSnapshot) {
    info!(
        "已开始: {} / {}，进行中: {}",
        snapshot.started(),
        snapshot.total_discovered,
        snapshot.active.len()
    );
    for task in &snapshot.active {
        info!("  {} - {}", task.name, task.progress_label);
    }
}

/// 定时进度报告器
///
/// 与工作池同时启动，工作池结束后由调用方 `stop`
#[derive(Debug)]
pub struct ProgressReporter {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    /// 启动报告器，快照写入日志
    pub fn start(
        interval: Duration,
        total_discovered: usize,
        queue: Arc<TaskQueue>,
        in_flight: Arc<InFlightSet>,
    ) -> Self {
        Self::start_with_sink(interval, total_discovered, queue, in_flight, log_snapshot)
    }

    /// 启动报告器，快照交给指定的输出函数
    pub fn start_with_sink<F>(
        interval: Duration,
        total_discovered: usize,
        queue: Arc<TaskQueue>,
        in_flight: Arc<InFlightSet>,
        sink: F,
    ) -> Self
    where
        F: Fn(&ProgressSnapshot) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let interval = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // 第一次 tick 立即返回，跳过
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = ProgressSnapshot::capture(total_discovered, &queue, &in_flight);
                        sink(&snapshot);
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    /// 停止报告器并等待其退出
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("进度报告器异常退出: {}", e);
        }
    }
}
