// 镜像引擎模块

pub mod checksum;
pub mod download;
pub mod engine;
pub mod enumerator;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod staging;
pub mod task;

pub use checksum::{checksums_match, digest_file, DigestAlgorithm};
pub use download::{DownloadOptions, ResumableDownloader, TransferOutcome};
pub use engine::{MirrorEngine, RunSummary};
pub use enumerator::DirectoryEnumerator;
pub use pool::{JobStatus, PoolSummary, WorkerPool};
pub use progress::{InFlightSet, ProgressReporter, ProgressSnapshot, TaskProgress};
pub use queue::TaskQueue;
pub use staging::StagingManager;
pub use task::{ResumePoint, TaskPhase, TransferTask};
