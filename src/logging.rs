//! 日志系统
//!
//! 控制台输出 + 可选的文件输出。日志文件按启动时间命名，超过大小上限滚动到
//! `_N` 后缀的新文件，启动时清理超过保留天数的旧文件。

use crate::config::LogConfig;
use chrono::Local;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "drive-mirror.";
const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// drive-mirror.{timestamp}.log / drive-mirror.{timestamp}_{index}.log
fn log_file_name(start_timestamp: &str, index: u32) -> String {
    if index == 0 {
        format!("{}{}.log", LOG_FILE_PREFIX, start_timestamp)
    } else {
        format!("{}{}_{}.log", LOG_FILE_PREFIX, start_timestamp, index)
    }
}

struct RollingFile {
    start_timestamp: String,
    log_dir: PathBuf,
    current: Option<File>,
    /// 0 为首个文件
    index: u32,
    max_file_size: u64,
    written: u64,
}

impl RollingFile {
    fn open(log_dir: PathBuf, start_timestamp: String, max_file_size: u64) -> io::Result<Self> {
        let mut file = Self {
            start_timestamp,
            log_dir,
            current: None,
            index: 0,
            max_file_size: max_file_size.max(1),
            written: 0,
        };
        file.open_current()?;
        Ok(file)
    }

    fn path_for(&self, index: u32) -> PathBuf {
        self.log_dir.join(log_file_name(&self.start_timestamp, index))
    }

    fn open_current(&mut self) -> io::Result<()> {
        let path = self.path_for(self.index);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.written = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current = Some(file);
        Ok(())
    }

    fn write_data(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 空文件不滚动，单条超长日志也能写下
        if self.written > 0 && self.written + buf.len() as u64 > self.max_file_size {
            if let Some(mut file) = self.current.take() {
                file.flush()?;
            }
            self.index += 1;
            self.open_current()?;
        }

        let file = self
            .current
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件未打开"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 按大小滚动的日志文件写入器
#[derive(Clone)]
pub struct LogFileManager {
    inner: Arc<Mutex<RollingFile>>,
}

impl LogFileManager {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let start_timestamp = Local::now().format("%Y-%m-%d-%H%M%S").to_string();
        Self::with_timestamp(log_dir, start_timestamp, max_file_size)
    }

    fn with_timestamp(
        log_dir: PathBuf,
        start_timestamp: String,
        max_file_size: u64,
    ) -> io::Result<Self> {
        let inner = RollingFile::open(log_dir, start_timestamp, max_file_size)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }
}

impl Write for LogFileManager {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write_data(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// 日志守卫，程序结束前必须保持存活，否则文件写入线程会退出
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先于配置中的级别。文件输出初始化失败时回退到仅控制台
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
        .with_ansi(true);

    let file_writer = if config.enabled {
        match open_log_writer(&config.log_dir, config.max_file_size) {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!("创建日志文件失败: {:?}: {}，仅输出到控制台", config.log_dir, e);
                None
            }
        }
    } else {
        None
    };

    let (file_layer, file_guard) = match file_writer {
        Some(manager) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(manager);
            let layer = fmt::layer()
                .with_target(true)
                .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
                .with_ansi(false)
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let file_enabled = file_layer.is_some();

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("日志系统已初始化过: {}", e);
    }

    if file_enabled {
        info!(
            "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
            config.log_dir,
            config.retention_days,
            config.level,
            config.max_file_size as f64 / 1024.0 / 1024.0
        );
        let removed = cleanup_old_logs(&config.log_dir, config.retention_days);
        if removed > 0 {
            info!("已清理 {} 个过期日志文件", removed);
        }
    } else {
        info!("日志系统初始化完成（仅控制台输出）");
    }

    LogGuard {
        _file_guard: file_guard,
    }
}

fn open_log_writer(log_dir: &Path, max_file_size: u64) -> io::Result<LogFileManager> {
    fs::create_dir_all(log_dir)?;
    LogFileManager::new(log_dir.to_path_buf(), max_file_size)
}

/// 删除超过保留天数的日志文件，返回删除数量
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> usize {
    let today = Local::now().date_naive();
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("读取日志目录失败: {:?}: {}", log_dir, e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !name.starts_with(LOG_FILE_PREFIX) || !name.ends_with(".log") {
            continue;
        }

        // 文件名里的日期不可用时退回到修改时间
        let expired = match extract_date_from_filename(name) {
            Some(date) => today.signed_duration_since(date) > retention,
            None => expired_by_modified_time(&entry, retention),
        };
        if !expired {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                removed += 1;
                debug!("已删除过期日志文件: {:?}", path);
            }
            Err(e) => warn!("删除过期日志文件失败: {:?}: {}", path, e),
        }
    }
    removed
}

/// drive-mirror.YYYY-MM-DD-HHMMSS[_N].log → YYYY-MM-DD
fn extract_date_from_filename(filename: &str) -> Option<chrono::NaiveDate> {
    let name = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(".log")?;
    let date = name.get(..10)?;
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn expired_by_modified_time(entry: &fs::DirEntry, retention: chrono::Duration) -> bool {
    let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
        return false;
    };
    let modified: chrono::DateTime<chrono::Utc> = modified.into();
    chrono::Utc::now().signed_duration_since(modified) > retention
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_date() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            extract_date_from_filename("drive-mirror.2024-03-09-101500.log"),
            Some(date)
        );
        assert_eq!(
            extract_date_from_filename("drive-mirror.2024-03-09-101500_3.log"),
            Some(date)
        );
        assert_eq!(extract_date_from_filename("drive-mirror.garbage.log"), None);
        assert_eq!(extract_date_from_filename("other.2024-03-09.log"), None);
    }

    #[test]
    fn test_rotation_by_size() {
        let dir = TempDir::new().unwrap();
        let mut manager =
            LogFileManager::with_timestamp(dir.path().to_path_buf(), "2024-01-01-000000".into(), 10)
                .unwrap();

        manager.write_all(b"12345678").unwrap();
        manager.write_all(b"abcdef").unwrap();
        manager.write_all(b"xy").unwrap();
        manager.flush().unwrap();

        let first = fs::read(dir.path().join("drive-mirror.2024-01-01-000000.log")).unwrap();
        let second = fs::read(dir.path().join("drive-mirror.2024-01-01-000000_1.log")).unwrap();
        assert_eq!(first, b"12345678");
        assert_eq!(second, b"abcdefxy");
    }

    #[test]
    fn test_cleanup_removes_expired_logs_only() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("drive-mirror.2000-01-01-000000.log");
        let recent = dir
            .path()
            .join(log_file_name(&Local::now().format("%Y-%m-%d-%H%M%S").to_string(), 0));
        let unrelated = dir.path().join("notes-2000-01-01.log");
        for path in [&old, &recent, &unrelated] {
            fs::write(path, b"x").unwrap();
        }

        assert_eq!(cleanup_old_logs(dir.path(), 7), 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(unrelated.exists());
    }
}
