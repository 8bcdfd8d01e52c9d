//! 跳板机连接
//!
//! 整个巡检共享一条到跳板机的已认证传输，按目标按需打开
//! direct-tcpip 隧道。只认证一次；跳板机打不开是致命错误，
//! 单条隧道打不开只跳过对应设备。

use russh::client;
use russh::ChannelStream;
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::error::{AppError, Result};
use crate::ssh::hostkey::HostKeyChecker;
use crate::ssh::session::{authenticate, client_config, AuthFailure, AuthMethod, SessionSettings};

/// 隧道发起方声明的源地址（跳板机视角，仅作标识）
const ORIGINATOR_ADDR: &str = "127.0.0.1";
const ORIGINATOR_PORT: u32 = 22;

/// 已认证的跳板机传输
///
/// 打开隧道只需要 `&self`，多个设备任务可以并发共享同一个连接。
pub struct RelayConnection {
    handle: client::Handle<HostKeyChecker>,
    host: String,
    port: u16,
}

impl RelayConnection {
    /// 连接并认证跳板机
    ///
    /// 不做重试：没有跳板机任何目标都不可达，直接终止巡检。
    pub async fn open(
        host: &str,
        port: u16,
        username: &str,
        auth: &AuthMethod,
        settings: &SessionSettings,
    ) -> Result<Self> {
        info!(host = %host, port = port, "connecting relay");

        let checker = HostKeyChecker::new(
            settings.host_key_verification.clone(),
            None,
            host.to_string(),
            port,
        );

        let mut handle = timeout(
            settings.overall_connect_timeout(),
            client::connect(client_config(), (host.to_string(), port), checker),
        )
        .await
        .map_err(|_| {
            AppError::RelayUnreachable(format!("connect timeout: {}:{}", host, port))
        })?
        .map_err(|e| {
            error!(host = %host, error = %e, "Relay connection failed");
            AppError::RelayUnreachable(format!("{}:{}: {}", host, port, e))
        })?;

        let auth_result = authenticate(&mut handle, username, auth)
            .await
            .map_err(AuthFailure::into_relay_error)?;

        if !auth_result {
            error!(host = %host, user = %username, "Relay authentication rejected");
            return Err(AppError::RelayAuthFailed(format!("{}@{}:{}", username, host, port)));
        }

        info!(host = %host, port = port, "Relay authenticated");

        Ok(Self {
            handle,
            host: host.to_string(),
            port,
        })
    }

    /// 打开一条到目标设备的 direct-tcpip 隧道
    ///
    /// 跳板机在其出站连接与本通道之间裸转发字节，返回的流对
    /// 调用方来说就是一条到目标的普通连接。
    pub async fn open_channel(
        &self,
        target_host: &str,
        target_port: u16,
    ) -> Result<ChannelStream<client::Msg>> {
        debug!(
            relay = %self.host,
            target_host = %target_host,
            target_port = target_port,
            "Opening tunneled channel"
        );

        let channel = self
            .handle
            .channel_open_direct_tcpip(
                target_host,
                target_port as u32,
                ORIGINATOR_ADDR,
                ORIGINATOR_PORT,
            )
            .await
            .map_err(|e| {
                AppError::channel(format!("{} -> {}:{}: {}", self.host, target_host, target_port, e))
            })?;

        Ok(channel.into_stream())
    }

    /// 释放跳板机传输
    ///
    /// 即使有隧道没有干净关闭也安全；断开错误忽略。
    pub async fn close(&self) {
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
        debug!(host = %self.host, port = self.port, "Relay transport closed");
    }
}
