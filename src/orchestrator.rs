//! 巡检编排器
//!
//! 单次巡检的状态机：
//! INIT → (RELAY_UP | DIRECT) → 每台设备 [CONNECT → RUN_BATCH →
//! EXTRACT → STORE → DISCONNECT] → RELAY_DOWN → DONE。
//! 设备之间相互独立，由有界工作池并发执行；单台设备任何阶段
//! 失败都只降级该设备的报告条目，不影响其余设备。

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audit::batch::CommandBatch;
use crate::audit::extractor::{extract, DeviceProfile, HealthFinding};
use crate::audit::report::{FleetReport, TargetReport};
use crate::config::{AppConfig, Target};
use crate::error::Result;
use crate::ssh::factory::SessionFactory;
use crate::ssh::session::{DeviceSession, SettleStrategy};
use crate::transcript::TranscriptStore;

/// 巡检编排器
pub struct FleetOrchestrator {
    config: Arc<AppConfig>,
    factory: Arc<dyn SessionFactory>,
    batch: Arc<CommandBatch>,
    profile: Arc<DeviceProfile>,
    store: TranscriptStore,
    cancel: CancellationToken,
}

impl FleetOrchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        factory: Arc<dyn SessionFactory>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let batch = Arc::new(config.batch.build()?);
        let profile = Arc::new(config.profile.clone());
        let store = TranscriptStore::new(&config.transcript.base_dir);

        Ok(Self {
            config,
            factory,
            batch,
            profile,
            store,
            cancel,
        })
    }

    /// 执行整轮巡检
    ///
    /// 中继级失败在任何设备被尝试之前返回错误；其余情况总是
    /// 产出一份报告，条目按配置的目标顺序排列。
    pub async fn run(&self) -> Result<FleetReport> {
        let started = Instant::now();

        // 致命：没有中继任何目标都不可达
        self.factory.prepare().await?;

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max_sessions));
        let entries: Arc<Mutex<Vec<(usize, TargetReport)>>> = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = JoinSet::new();

        for (position, target) in self.config.targets.iter().cloned().enumerate() {
            // 任务启动前的协作式取消检查
            if self.cancel.is_cancelled() {
                warn!(target_name = %target.name, "Audit cancelled, skipping remaining targets");
                break;
            }

            let factory = Arc::clone(&self.factory);
            let batch = Arc::clone(&self.batch);
            let profile = Arc::clone(&self.profile);
            let store = self.store.clone();
            let settle = self.config.session.settle.clone();
            let cancel = self.cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            let entries = Arc::clone(&entries);

            tasks.spawn(async move {
                // 信号量在整轮巡检期间不会被关闭
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                if cancel.is_cancelled() {
                    return;
                }

                let report =
                    audit_target(factory, batch, profile, store, settle, cancel, target).await;

                // 追加是唯一的跨任务共享写，由锁串行化
                entries.lock().await.push((position, report));
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Target task failed to join");
            }
        }

        // 无论各设备结果如何，中继只关一次
        self.factory.shutdown().await;

        let mut collected = Arc::try_unwrap(entries)
            .map(|m| m.into_inner())
            .unwrap_or_default();
        collected.sort_by_key(|(position, _)| *position);

        let report =
            FleetReport::new(collected.into_iter().map(|(_, entry)| entry).collect());

        info!(
            targets = report.entries.len(),
            needs_review = report.needs_review_count(),
            duration_secs = started.elapsed().as_secs_f64(),
            "run-complete"
        );

        Ok(report)
    }
}

/// 单台设备的完整流水线：连接 → 批次 → 提取 → 落盘 → 断开
async fn audit_target(
    factory: Arc<dyn SessionFactory>,
    batch: Arc<CommandBatch>,
    profile: Arc<DeviceProfile>,
    store: TranscriptStore,
    settle: SettleStrategy,
    cancel: CancellationToken,
    target: Target,
) -> TargetReport {
    let name = target.name.clone();
    info!(target_name = %name, endpoint = %target.endpoint(), "connecting");

    let transport = match factory.open_shell(&target).await {
        Ok(transport) => transport,
        Err(e) => {
            warn!(target_name = %name, error = %e, "channel-failed");
            return TargetReport::degraded(name, &batch, &e.to_string());
        }
    };

    let mut session = DeviceSession::new(name.clone(), transport, settle, cancel);
    let outcome = session.run_batch(&batch).await;
    let _ = session.close().await;

    // 提取先于落盘：落盘失败时内存中的结论照常上报
    let hint = store.path_for(&name).display().to_string();
    let mut findings: Vec<HealthFinding> = Vec::new();
    for result in &outcome.results {
        for line in &result.lines {
            if let Some(finding) = extract(&profile, &batch, result.index, line, &name, &hint) {
                findings.push(finding);
            }
        }
    }

    if !outcome.transcript.is_empty() {
        if let Err(e) = store.save(&name, &outcome.transcript).await {
            error!(target_name = %name, error = %e, "store-failed");
        }
    }

    match outcome.error {
        Some(e) => {
            warn!(target_name = %name, error = %e, "Batch aborted mid-run");
            TargetReport::degraded(name, &batch, &e.to_string())
        }
        None => TargetReport::collected(name, findings),
    }
}
