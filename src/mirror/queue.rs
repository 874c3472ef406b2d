use crate::drive::FileDescriptor;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 待传输文件队列（先进先出）
///
/// 启动时一次性填充，各工作槽并发取出，每个文件只会被一个槽取到
#[derive(Debug)]
pub struct TaskQueue {
    items: Mutex<VecDeque<FileDescriptor>>,
    /// 剩余数量，供进度报告无锁读取
    remaining: AtomicUsize,
}

impl TaskQueue {
    pub fn new(files: Vec<FileDescriptor>) -> Self {
        let remaining = AtomicUsize::new(files.len());
        Self {
            items: Mutex::new(files.into()),
            remaining,
        }
    }

    /// 取出队首文件
    pub fn pop(&self) -> Option<FileDescriptor> {
        let mut items = self.items.lock();
        let item = items.pop_front();
        self.remaining.store(items.len(), Ordering::Relaxed);
        item
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
