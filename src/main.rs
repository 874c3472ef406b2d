use anyhow::Context;
use clap::Parser;
use drive_mirror::{
    config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH},
    logging, DriveClient, MirrorEngine,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 命令行参数（覆盖配置文件中的对应项）
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Drive Mirror - 镜像共享网盘目录到本地，支持中转复制与断点续传"
)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// 远程根目录ID
    #[arg(long)]
    root: Option<String>,

    /// 本地保存目录
    #[arg(long = "dest")]
    destination: Option<PathBuf>,

    /// 中转目录ID
    #[arg(long)]
    staging: Option<String>,

    /// 同时传输的文件数
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// 不使用中转复制，直接从源文件下载
    #[arg(long)]
    no_bypass: bool,

    /// 本地已完整的文件也做 MD5 校验
    #[arg(long)]
    verify_existing: bool,
}

impl Cli {
    fn apply_to(&self, config: &mut AppConfig) {
        let mirror = &mut config.mirror;
        if let Some(root) = &self.root {
            mirror.root_id = root.clone();
        }
        if let Some(destination) = &self.destination {
            mirror.destination = destination.clone();
        }
        if let Some(staging) = &self.staging {
            mirror.staging_container_id = staging.clone();
        }
        if let Some(concurrency) = self.concurrency {
            mirror.concurrency = concurrency;
        }
        if self.no_bypass {
            mirror.bypass_quota = false;
        }
        if self.verify_existing {
            mirror.verify_existing = true;
        }
    }
}

/// 日志系统初始化前只读取 [log] 段，失败时使用默认值
async fn load_log_config(path: &Path) -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(path).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }
    LogConfig::default()
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = AppConfig::load_or_default(&cli.config).await;
    cli.apply_to(&mut config);
    config
        .mirror
        .validate()
        .with_context(|| format!("配置无效，请检查 {:?} 或命令行参数", cli.config))?;

    let token = config.drive.resolve_access_token().with_context(|| {
        format!(
            "未找到访问令牌，请在配置 [drive].access_token 或环境变量 {} 中设置",
            drive_mirror::config::ACCESS_TOKEN_ENV
        )
    })?;
    let client = DriveClient::new(&config.drive, token).context("创建 Drive 客户端失败")?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("收到中断信号，正在停止（已下载的部分会保留）...");
                ctrl_c_token.cancel();
            }
            Err(e) => error!("监听中断信号失败: {}", e),
        }
    });

    let engine = MirrorEngine::new(Arc::new(client), config.mirror.clone()).with_cancellation(cancel);
    let summary = engine.run_configured().await.context("镜像运行失败")?;

    info!(
        "汇总: 发现 {}，完成 {}，跳过 {}，失败 {}，取消 {}，未开始 {}",
        summary.discovered,
        summary.completed,
        summary.skipped,
        summary.failed,
        summary.cancelled,
        summary.not_started
    );
    Ok(summary.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = load_log_config(&cli.config).await;
    let _log_guard = logging::init_logging(&log_config);

    info!("Drive Mirror v{} 启动", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
