//! 编排器集成测试的共享工具
//! 提供脚本化的假会话工厂，替换真实 SSH，逐台设备注入预设输出

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::Secret;
use tokio_util::sync::CancellationToken;

use fleet_audit::config::{
    AppConfig, ConcurrencySettings, LoggingConfig, RelaySettings, Target, TranscriptSettings,
};
use fleet_audit::error::{AppError, Result};
use fleet_audit::ssh::factory::SessionFactory;
use fleet_audit::ssh::session::{SessionSettings, SettleStrategy, ShellTransport};

/// 一台设备在本轮测试中的剧本
#[derive(Clone)]
pub enum TargetScript {
    /// 通道正常，依次回放这些输出（每条命令一份）
    Replay(Vec<&'static str>),
    /// 开通道直接失败
    OpenFails(AppError),
    /// 回放若干输出后在读取时失败
    FailAfter(Vec<&'static str>, AppError),
}

/// 脚本化命令通道
pub struct ScriptedShell {
    outputs: VecDeque<Result<Vec<u8>>>,
    closed: bool,
}

#[async_trait]
impl ShellTransport for ScriptedShell {
    async fn send_line(&mut self, _command: &str) -> Result<()> {
        Ok(())
    }

    async fn read_settled(
        &mut self,
        _settle: &SettleStrategy,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.outputs
            .pop_front()
            .unwrap_or_else(|| Err(AppError::session_io("script exhausted")))
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// 脚本化会话工厂
pub struct ScriptedFactory {
    prepare_error: Option<AppError>,
    scripts: HashMap<String, TargetScript>,
    pub prepare_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(scripts: Vec<(&str, TargetScript)>) -> Arc<Self> {
        Arc::new(Self {
            prepare_error: None,
            scripts: scripts
                .into_iter()
                .map(|(name, script)| (name.to_string(), script))
                .collect(),
            prepare_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
        })
    }

    pub fn failing_prepare(error: AppError) -> Arc<Self> {
        Arc::new(Self {
            prepare_error: Some(error),
            scripts: HashMap::new(),
            prepare_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn prepare(&self) -> Result<()> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        match &self.prepare_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn open_shell(&self, target: &Target) -> Result<Box<dyn ShellTransport>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);

        let script = self
            .scripts
            .get(&target.name)
            .cloned()
            .unwrap_or_else(|| panic!("no script for target {}", target.name));

        match script {
            TargetScript::OpenFails(e) => Err(e),
            TargetScript::Replay(outputs) => Ok(Box::new(ScriptedShell {
                outputs: outputs
                    .into_iter()
                    .map(|s| Ok(s.as_bytes().to_vec()))
                    .collect(),
                closed: false,
            })),
            TargetScript::FailAfter(outputs, error) => {
                let mut queue: VecDeque<Result<Vec<u8>>> = outputs
                    .into_iter()
                    .map(|s| Ok(s.as_bytes().to_vec()))
                    .collect();
                queue.push_back(Err(error));
                Ok(Box::new(ScriptedShell {
                    outputs: queue,
                    closed: false,
                }))
            }
        }
    }

    async fn shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// 构造一台带密码认证的目标设备
pub fn make_target(name: &str) -> Target {
    Target {
        name: name.to_string(),
        host: format!("{}.example.net", name),
        port: 22,
        username: "auditor".to_string(),
        password: Some(Secret::new("secret".to_string())),
        private_key_file: None,
        passphrase: None,
    }
}

/// 每轮测试独立的成绩单目录
pub fn temp_transcript_dir() -> PathBuf {
    std::env::temp_dir().join(format!("atp-orch-{}", uuid::Uuid::new_v4()))
}

/// 组装测试配置：默认批次与档案，成绩单落到独立临时目录
pub fn test_config(targets: Vec<Target>, transcript_dir: &PathBuf, max_sessions: usize) -> AppConfig {
    AppConfig {
        relay: RelaySettings::default(),
        targets,
        batch: Default::default(),
        profile: Default::default(),
        session: SessionSettings::default(),
        transcript: TranscriptSettings {
            base_dir: transcript_dir.display().to_string(),
        },
        concurrency: ConcurrencySettings { max_sessions },
        logging: LoggingConfig::default(),
    }
}

/// 统计目录树下的成绩单文件数
pub fn count_transcripts(dir: &PathBuf) -> usize {
    let mut count = 0;
    let mut stack = vec![dir.clone()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                count += 1;
            }
        }
    }
    count
}
