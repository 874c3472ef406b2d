use crate::drive::FileDescriptor;
use crate::mirror::progress::TaskProgress;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// 单个文件的传输阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// 检查本地已有文件
    Init,
    /// 准备中转副本
    ResolveStage,
    /// 下载中
    Downloading,
    /// 校验中
    Verifying,
    /// 已结束（成功或失败）
    Done,
}

/// 本地文件检查结果，决定从哪里续传以及是否需要校验
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    /// 本地已有字节数
    pub bytes_on_disk: u64,
    /// 是否为续传（续传完成后必须校验）
    pub was_resuming: bool,
}

impl ResumePoint {
    pub fn fresh() -> Self {
        Self {
            bytes_on_disk: 0,
            was_resuming: false,
        }
    }
}

/// 传输任务
///
/// 由工作槽在取出文件描述时创建，流水线结束后丢弃
#[derive(Debug)]
pub struct TransferTask {
    /// 任务ID
    pub id: String,
    /// 远程文件描述
    pub descriptor: FileDescriptor,
    /// 本地保存路径
    pub local_path: PathBuf,
    /// 本地已写入字节数
    pub bytes_on_disk: u64,
    /// 中转副本ID，仅在副本存在期间有值
    pub staging_object_id: Option<String>,
    /// 是否为续传
    pub was_resuming: bool,
    /// 校验失败次数
    pub integrity_failures: u32,
    /// 共享给进度报告器的状态
    progress: Arc<TaskProgress>,
}

impl TransferTask {
    pub fn new(descriptor: FileDescriptor, destination: &Path) -> Self {
        let local_path = local_path_for(&descriptor, destination);
        let id = Uuid::new_v4().to_string();
        let progress = Arc::new(TaskProgress::new(descriptor.name.clone(), descriptor.size));

        Self {
            id,
            descriptor,
            local_path,
            bytes_on_disk: 0,
            staging_object_id: None,
            was_resuming: false,
            integrity_failures: 0,
            progress,
        }
    }

    pub fn progress(&self) -> Arc<TaskProgress> {
        Arc::clone(&self.progress)
    }

    pub fn phase(&self) -> TaskPhase {
        self.progress.phase()
    }

    pub fn set_phase(&self, phase: TaskPhase) {
        self.progress.set_phase(phase);
    }

    pub fn progress_label(&self) -> String {
        self.progress.label()
    }

    /// 应用本地文件检查结果
    pub fn apply_resume(&mut self, resume: ResumePoint) {
        self.bytes_on_disk = resume.bytes_on_disk.min(self.descriptor.size);
        self.was_resuming = resume.was_resuming;
        self.progress.set_bytes(self.bytes_on_disk);
    }

    /// 记录新写入的字节
    pub fn record_bytes(&mut self, written: u64) {
        self.bytes_on_disk = (self.bytes_on_disk + written).min(self.descriptor.size);
        self.progress.set_bytes(self.bytes_on_disk);
    }

    /// 还需下载的字节数
    pub fn remaining_bytes(&self) -> u64 {
        self.descriptor.size - self.bytes_on_disk
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_on_disk == self.descriptor.size
    }

    /// 校验失败后从头开始
    pub fn restart(&mut self) {
        self.bytes_on_disk = 0;
        self.progress.set_bytes(0);
    }
}

/// 计算本地保存路径：目标目录 / 相对目录 / 本地文件名
pub fn local_path_for(descriptor: &FileDescriptor, destination: &Path) -> PathBuf {
    let mut path = destination.to_path_buf();
    for component in descriptor.relative_dir.iter() {
        path.push(sanitize_file_name(&component.to_string_lossy()));
    }
    path.push(sanitize_file_name(&descriptor.local_name));
    path
}

/// 远程文件名可以包含路径分隔符，替换为下划线
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => format!("_{}", cleaned),
        _ => cleaned,
    }
}

/// 进度百分比，保留两位小数；大小为 0 视为已完成
pub fn format_percent(bytes: u64, size: u64) -> String {
    if size == 0 {
        return "100.00%".to_string();
    }
    format!("{:.2}%", bytes as f64 / size as f64 * 100.0)
}
