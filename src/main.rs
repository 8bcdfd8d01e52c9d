//! 机群巡检主入口
//! 读取清单、建立中继、逐台采集并输出健康报告

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use fleet_audit::audit::report::render_markdown;
use fleet_audit::config::AppConfig;
use fleet_audit::orchestrator::FleetOrchestrator;
use fleet_audit::ssh::factory::SshSessionFactory;
use fleet_audit::telemetry;

#[derive(Parser)]
#[command(name = "fleet-audit")]
#[command(about = "Run health checks across an SROS device fleet over SSH", long_about = None)]
#[command(version)]
struct Cli {
    /// 清单文件路径
    #[arg(long, short = 'c', default_value = "atp.yaml")]
    config: String,

    /// 覆盖清单中的会话记录目录
    #[arg(long)]
    transcript_dir: Option<String>,

    /// 忽略清单中的中继配置，全部直连
    #[arg(long)]
    no_relay: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 加载 .env 文件（开发环境）
    // 生产环境应该直接设置环境变量，不依赖 .env 文件
    dotenv::dotenv().ok();

    // 1. 加载配置
    let mut config = AppConfig::load(&cli.config).map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    if let Some(dir) = cli.transcript_dir {
        config.transcript.base_dir = dir;
    }
    if cli.no_relay {
        config.relay.use_relay = false;
    }

    // 2. 初始化日志
    telemetry::init_telemetry(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        manifest = %cli.config,
        targets = config.targets.len(),
        "Fleet audit starting..."
    );

    // 3. 组装会话工厂与编排器
    let config = Arc::new(config);
    let factory = Arc::new(SshSessionFactory::new(
        config.relay.clone(),
        config.session.clone(),
    ));
    let cancel = CancellationToken::new();

    let orchestrator = FleetOrchestrator::new(config, factory, cancel.clone())?;

    // 4. Ctrl+C 触发协作式取消，正在跑的目标收尾后退出
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling audit");
                cancel.cancel();
            }
        }
    });

    // 5. 执行整轮巡检
    let report = match orchestrator.run().await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Audit aborted before any target was processed");
            return Err(anyhow::anyhow!("audit aborted: {}", e));
        }
    };

    // 6. 输出报告
    println!("{}", render_markdown(&report));

    tracing::info!("Fleet audit complete");
    Ok(())
}
