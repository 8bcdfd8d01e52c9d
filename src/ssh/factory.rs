//! 会话工厂
//! 把"起中继 / 为某台设备开通道 / 收中继"收拢到一个接口后面，
//! 编排器不感知走隧道还是直连，测试也可以整体替换掉 SSH

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{RelaySettings, Target};
use crate::error::{AppError, Result};
use crate::ssh::relay::RelayConnection;
use crate::ssh::session::{SessionSettings, ShellTransport, SshShell};

/// 设备会话的来源
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// 一次性准备（中继模式下在第一台设备之前建立跳板机传输）。
    /// 返回的致命错误终止整个巡检。
    async fn prepare(&self) -> Result<()>;

    /// 为一台设备打开命令通道
    async fn open_shell(&self, target: &Target) -> Result<Box<dyn ShellTransport>>;

    /// 最后一台设备之后的清理（关闭跳板机传输），幂等
    async fn shutdown(&self);
}

/// 真实 SSH 会话工厂
pub struct SshSessionFactory {
    relay_settings: RelaySettings,
    session_settings: SessionSettings,
    relay: RwLock<Option<RelayConnection>>,
}

impl SshSessionFactory {
    pub fn new(relay_settings: RelaySettings, session_settings: SessionSettings) -> Self {
        Self {
            relay_settings,
            session_settings,
            relay: RwLock::new(None),
        }
    }
}

#[async_trait]
impl SessionFactory for SshSessionFactory {
    async fn prepare(&self) -> Result<()> {
        if !self.relay_settings.use_relay {
            info!("Relay disabled, connecting targets directly");
            return Ok(());
        }

        let auth = self.relay_settings.auth()?;
        let relay = RelayConnection::open(
            &self.relay_settings.host,
            self.relay_settings.port,
            &self.relay_settings.username,
            &auth,
            &self.session_settings,
        )
        .await?;

        *self.relay.write().await = Some(relay);
        Ok(())
    }

    async fn open_shell(&self, target: &Target) -> Result<Box<dyn ShellTransport>> {
        let auth = target.auth()?;

        if self.relay_settings.use_relay {
            let guard = self.relay.read().await;
            let relay = guard
                .as_ref()
                .ok_or_else(|| AppError::channel("relay transport not prepared"))?;

            let stream = relay.open_channel(&target.host, target.port).await?;
            let shell = SshShell::connect_over_relay(
                stream,
                &target.host,
                target.port,
                &target.username,
                &auth,
                &self.session_settings,
            )
            .await?;
            Ok(Box::new(shell))
        } else {
            let shell = SshShell::connect_direct(
                &target.host,
                target.port,
                &target.username,
                &auth,
                &self.session_settings,
            )
            .await?;
            Ok(Box::new(shell))
        }
    }

    async fn shutdown(&self) {
        if let Some(relay) = self.relay.write().await.take() {
            relay.close().await;
        }
    }
}
