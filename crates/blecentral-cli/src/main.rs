//! BLE Central CLI
//!
//! 命令行工具，直接驱动中心设备控制器：扫描、连接、查看状态

mod commands;

use anyhow::Result;
use blecentral_core::{CentralSettings, LogLevel};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "blecentral", version, about = "BLE 中心设备管理工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描附近设备
    Scan {
        /// 扫描时间 (秒)
        #[arg(short, long, default_value = "10")]
        timeout: u64,
        /// 只扫描包含该服务的设备 (可重复)
        #[arg(short, long = "service")]
        services: Vec<Uuid>,
        /// 只显示 iBeacon
        #[arg(long)]
        beacons_only: bool,
        /// 每个发现事件输出一行 JSON
        #[arg(long)]
        json: bool,
    },
    /// 连接设备，报告结果后断开
    Connect {
        /// 设备 ID (scan 输出的第一列)
        id: String,
        /// 连接超时 (秒)
        #[arg(short, long, default_value = "15")]
        timeout: u64,
    },
    /// 查看控制器状态
    Status {
        #[arg(long)]
        json: bool,
    },
    /// 管理配置文件
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// 显示当前配置
    Show,
    /// 写入默认配置
    Init {
        /// 覆盖已有文件
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = CentralSettings::load();
    init_logging(settings.log_level);

    match cli.command {
        Commands::Scan {
            timeout,
            services,
            beacons_only,
            json,
        } => {
            commands::scan(
                &settings,
                commands::ScanArgs {
                    timeout,
                    services,
                    beacons_only,
                    json,
                },
            )
            .await?
        }
        Commands::Connect { id, timeout } => commands::connect(&settings, id, timeout).await?,
        Commands::Status { json } => commands::status(&settings, json).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&settings)?,
            ConfigAction::Init { force } => commands::config_init(force)?,
        },
    }

    Ok(())
}

/// 日志写到 stderr，stdout 留给命令输出
fn init_logging(level: LogLevel) {
    // 桥接 log crate（blecentral-core 使用）到 tracing；设置了 RUST_LOG 时不限制级别
    let max_level = if std::env::var_os("RUST_LOG").is_some() {
        LogLevel::Trace
    } else {
        level.max(LogLevel::Debug)
    };
    let _ = tracing_log::LogTracer::builder()
        .with_max_level(max_level.level_filter())
        .init();

    let default_filter = format!(
        "{},blecentral_core={}",
        level.directive(),
        level.max(LogLevel::Debug).directive()
    );
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
