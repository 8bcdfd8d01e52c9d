//! 设备会话与命令批次执行
//!
//! 目标设备的 shell 没有请求/响应定界，批次协议严格串行：
//! 同一会话任何时刻只有一条在途命令，上一条命令的输出判定
//! 完成之前不发送下一条。输出完成判定是可插拔的（见
//! [`SettleStrategy`]），默认采用保守的空闲超时。

use async_trait::async_trait;
use russh::client::{self, Config};
use russh::{ChannelMsg, ChannelStream};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::audit::batch::{CommandBatch, CommandResult};
use crate::error::{AppError, Result};
use crate::ssh::hostkey::{HostKeyChecker, HostKeyVerification};

/// 提示符匹配时的轮询间隔
const PROMPT_POLL: Duration = Duration::from_millis(100);

/// 设备认证方式
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// 密码认证
    Password(Secret<String>),
    /// 私钥认证（私钥从文件加载）
    KeyFile {
        path: String,
        passphrase: Option<Secret<String>>,
    },
}

/// 会话级设置（超时与主机密钥策略）
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// TCP 连接超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// SSH 握手超时（秒）
    #[serde(default = "default_connect_timeout")]
    pub handshake_timeout_secs: u64,

    /// 输出完成判定策略
    #[serde(default)]
    pub settle: SettleStrategy,

    /// 主机密钥验证策略
    #[serde(default)]
    pub host_key_verification: HostKeyVerification,
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            handshake_timeout_secs: default_connect_timeout(),
            settle: SettleStrategy::default(),
            host_key_verification: HostKeyVerification::default(),
        }
    }
}

impl SessionSettings {
    /// 连接阶段的整体超时（与握手超时取较小值）
    pub fn overall_connect_timeout(&self) -> Duration {
        Duration::from_secs(std::cmp::min(
            self.connect_timeout_secs,
            self.handshake_timeout_secs,
        ))
    }
}

/// 输出完成判定策略
///
/// shell 不回送结束标记，需要一个外部判据决定何时停止读取：
/// 空闲超时（默认，保守）或提示符匹配。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SettleStrategy {
    /// 收到数据后连续 `idle_ms` 无新数据即视为完成
    IdleTimeout {
        #[serde(default = "default_idle_ms")]
        idle_ms: u64,
        #[serde(default = "default_max_wait_ms")]
        max_wait_ms: u64,
    },
    /// 输出尾部出现提示符即视为完成
    PromptPattern {
        pattern: String,
        #[serde(default = "default_max_wait_ms")]
        max_wait_ms: u64,
    },
}

fn default_idle_ms() -> u64 {
    1500
}

fn default_max_wait_ms() -> u64 {
    15000
}

impl Default for SettleStrategy {
    fn default() -> Self {
        SettleStrategy::IdleTimeout {
            idle_ms: default_idle_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl SettleStrategy {
    /// 读取的硬上限
    pub fn max_wait(&self) -> Duration {
        match self {
            SettleStrategy::IdleTimeout { max_wait_ms, .. }
            | SettleStrategy::PromptPattern { max_wait_ms, .. } => {
                Duration::from_millis(*max_wait_ms)
            }
        }
    }
}

/// 命令通道抽象：发送一行、读到完成、关闭
///
/// 真实实现是 SSH PTY shell；测试用脚本化的假实现注入。
#[async_trait]
pub trait ShellTransport: Send {
    /// 发送一条命令（实现负责补行结束符）
    async fn send_line(&mut self, command: &str) -> Result<()>;

    /// 按策略读取直到输出完成，返回原始字节
    async fn read_settled(
        &mut self,
        settle: &SettleStrategy,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>;

    /// 关闭通道，幂等
    async fn close(&mut self) -> Result<()>;
}

/// 读取循环感知的通道事件，与具体传输解耦
#[derive(Debug)]
enum ShellEvent {
    /// 标准输出数据
    Data(Vec<u8>),
    /// 标准错误数据（与标准输出合并采集）
    Stderr(Vec<u8>),
    /// 通道结束（EOF / 关闭 / 连接断开）
    Closed,
    /// 与输出无关的其它消息
    Other,
}

/// 读取循环的事件来源：真实实现包装 russh 通道，测试注入脚本
#[async_trait]
trait EventSource: Send {
    async fn next_event(&mut self) -> ShellEvent;
}

/// 输出完成判定的状态机，独立于传输实现
///
/// 空闲超时模式：一个轮询窗口内没有新事件、且已有输出即视为完成。
/// 提示符模式：输出尾部出现提示符即完成，窗口内无数据则继续等。
/// 两种模式都受 max_wait 硬上限约束；缓冲区为空时通道结束是错误。
async fn read_settled_from(
    source: &mut dyn EventSource,
    settle: &SettleStrategy,
    cancel: &CancellationToken,
) -> Result<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();
    let deadline = Instant::now() + settle.max_wait();

    let (poll, prompt) = match settle {
        SettleStrategy::IdleTimeout { idle_ms, .. } => (Duration::from_millis(*idle_ms), None),
        SettleStrategy::PromptPattern { pattern, .. } => (PROMPT_POLL, Some(pattern.as_str())),
    };

    loop {
        if let Some(pattern) = prompt {
            // 只看尾部，避免每轮扫描整个缓冲
            let tail_start = buf.len().saturating_sub(256);
            let tail = String::from_utf8_lossy(&buf[tail_start..]);
            if tail.contains(pattern) {
                break;
            }
        }

        if Instant::now() >= deadline {
            warn!("Read reached max wait before output settled");
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AppError::session_io("audit cancelled"));
            }
            event = timeout(poll, source.next_event()) => match event {
                Ok(ShellEvent::Data(data)) => {
                    buf.extend_from_slice(&data);
                }
                Ok(ShellEvent::Stderr(data)) => {
                    buf.extend_from_slice(&data);
                }
                Ok(ShellEvent::Closed) => {
                    if buf.is_empty() {
                        return Err(AppError::session_io("channel closed mid-batch"));
                    }
                    break;
                }
                Ok(ShellEvent::Other) => {}
                Err(_) => {
                    // 空闲窗口内无新数据：已有输出即视为完成；
                    // 提示符模式继续等到提示符或截止时间
                    if prompt.is_none() && !buf.is_empty() {
                        break;
                    }
                }
            },
        }
    }

    Ok(buf)
}

/// 认证阶段的失败原因
///
/// 凭据问题与传输层问题分开归类：认证交换中途连接断开是可达性
/// 失败，认证类错误只留给凭据被拒绝和密钥无法加载。
#[derive(Debug)]
pub(crate) enum AuthFailure {
    /// 私钥文件无法加载
    KeyLoad(String),
    /// 认证交换期间传输层失败
    Transport(String),
}

impl AuthFailure {
    /// 跳板机侧的错误归类
    pub(crate) fn into_relay_error(self) -> AppError {
        match self {
            AuthFailure::KeyLoad(msg) => AppError::RelayAuthFailed(msg),
            AuthFailure::Transport(msg) => AppError::RelayUnreachable(msg),
        }
    }

    /// 目标设备侧的错误归类
    pub(crate) fn into_device_error(self) -> AppError {
        match self {
            AuthFailure::KeyLoad(msg) => AppError::DeviceAuthFailed(msg),
            AuthFailure::Transport(msg) => AppError::DeviceUnreachable(msg),
        }
    }
}

/// 对 russh Handle 做认证，密码或私钥
pub(crate) async fn authenticate(
    handle: &mut client::Handle<HostKeyChecker>,
    username: &str,
    auth: &AuthMethod,
) -> std::result::Result<bool, AuthFailure> {
    match auth {
        AuthMethod::Password(password) => handle
            .authenticate_password(username.to_string(), password.expose_secret())
            .await
            .map_err(|e| AuthFailure::Transport(e.to_string())),
        AuthMethod::KeyFile { path, passphrase } => {
            let key = russh_keys::load_secret_key(
                path,
                passphrase.as_ref().map(|p| p.expose_secret().as_str()),
            )
            .map_err(|e| {
                AuthFailure::KeyLoad(format!("failed to load private key {}: {}", path, e))
            })?;

            handle
                .authenticate_publickey(username.to_string(), Arc::new(key))
                .await
                .map_err(|e| AuthFailure::Transport(e.to_string()))
        }
    }
}

pub(crate) fn client_config() -> Arc<Config> {
    Arc::new(Config {
        preferred: russh::Preferred::default(),
        ..Default::default()
    })
}

/// 真实 SSH shell 通道
pub struct SshShell {
    handle: client::Handle<HostKeyChecker>,
    channel: russh::Channel<client::Msg>,
    closed: bool,
}

impl SshShell {
    /// 直连目标设备（VPN / 扁平网络模式）
    pub async fn connect_direct(
        host: &str,
        port: u16,
        username: &str,
        auth: &AuthMethod,
        settings: &SessionSettings,
    ) -> Result<Self> {
        let checker = HostKeyChecker::new(
            settings.host_key_verification.clone(),
            None,
            host.to_string(),
            port,
        );

        let handle = timeout(
            settings.overall_connect_timeout(),
            client::connect(client_config(), (host.to_string(), port), checker),
        )
        .await
        .map_err(|_| {
            AppError::DeviceUnreachable(format!("connect timeout: {}@{}:{}", username, host, port))
        })?
        .map_err(|e| AppError::DeviceUnreachable(format!("{}:{}: {}", host, port, e)))?;

        Self::finish_connect(handle, host, port, username, auth).await
    }

    /// 经由跳板机隧道连接目标设备
    pub async fn connect_over_relay(
        stream: ChannelStream<client::Msg>,
        host: &str,
        port: u16,
        username: &str,
        auth: &AuthMethod,
        settings: &SessionSettings,
    ) -> Result<Self> {
        let checker = HostKeyChecker::new(
            settings.host_key_verification.clone(),
            None,
            host.to_string(),
            port,
        );

        let handle = timeout(
            settings.overall_connect_timeout(),
            client::connect_stream(client_config(), stream, checker),
        )
        .await
        .map_err(|_| {
            AppError::DeviceUnreachable(format!(
                "handshake timeout over relay: {}@{}:{}",
                username, host, port
            ))
        })?
        .map_err(|e| AppError::DeviceUnreachable(format!("{}:{} over relay: {}", host, port, e)))?;

        Self::finish_connect(handle, host, port, username, auth).await
    }

    /// 认证并打开 PTY shell
    async fn finish_connect(
        mut handle: client::Handle<HostKeyChecker>,
        host: &str,
        port: u16,
        username: &str,
        auth: &AuthMethod,
    ) -> Result<Self> {
        let auth_result = authenticate(&mut handle, username, auth)
            .await
            .map_err(AuthFailure::into_device_error)?;

        if !auth_result {
            error!(host = %host, user = %username, "device-auth-failed");
            return Err(AppError::DeviceAuthFailed(format!("{}@{}:{}", username, host, port)));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| AppError::session_io(format!("open shell channel: {}", e)))?;

        channel
            .request_pty(false, "vt100", 200, 80, 0, 0, &[])
            .await
            .map_err(|e| AppError::session_io(format!("request pty: {}", e)))?;

        channel
            .request_shell(true)
            .await
            .map_err(|e| AppError::session_io(format!("request shell: {}", e)))?;

        debug!(host = %host, port = port, "Shell session established");

        Ok(Self {
            handle,
            channel,
            closed: false,
        })
    }
}

/// russh 通道的事件适配，只保留读取循环关心的消息
struct ChannelEvents<'a> {
    channel: &'a mut russh::Channel<client::Msg>,
}

#[async_trait]
impl EventSource for ChannelEvents<'_> {
    async fn next_event(&mut self) -> ShellEvent {
        match self.channel.wait().await {
            Some(ChannelMsg::Data { ref data }) => ShellEvent::Data(data.to_vec()),
            Some(ChannelMsg::ExtendedData { ref data, ext }) if ext == 1 => {
                ShellEvent::Stderr(data.to_vec())
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => ShellEvent::Closed,
            Some(_) => ShellEvent::Other,
        }
    }
}

#[async_trait]
impl ShellTransport for SshShell {
    async fn send_line(&mut self, command: &str) -> Result<()> {
        if self.closed {
            return Err(AppError::session_io("channel already closed"));
        }
        let line = format!("{}\r\n", command);
        self.channel
            .data(line.as_bytes())
            .await
            .map_err(|e| AppError::session_io(format!("send command: {}", e)))
    }

    async fn read_settled(
        &mut self,
        settle: &SettleStrategy,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut source = ChannelEvents {
            channel: &mut self.channel,
        };
        read_settled_from(&mut source, settle, cancel).await
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.channel.eof().await;
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await;
        Ok(())
    }
}

/// 一次批次执行的结果：中途失败时已采集的部分仍然返回
#[derive(Debug)]
pub struct BatchOutcome {
    /// 逐命令结果，按批次顺序
    pub results: Vec<CommandResult>,
    /// 全批次拼接的原始输出，换行终止
    pub transcript: String,
    /// 中途失败的错误（完整跑完为 None）
    pub error: Option<AppError>,
}

/// 一台设备的命令会话
pub struct DeviceSession {
    target_name: String,
    transport: Box<dyn ShellTransport>,
    settle: SettleStrategy,
    cancel: CancellationToken,
}

impl DeviceSession {
    pub fn new(
        target_name: String,
        transport: Box<dyn ShellTransport>,
        settle: SettleStrategy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target_name,
            transport,
            settle,
            cancel,
        }
    }

    /// 按顺序执行整个批次
    ///
    /// 每条命令：发送 → 等输出完成 → 宽松解码 → 按行切分，
    /// 行先进成绩单再进该命令的结果。严格串行，不流水线。
    pub async fn run_batch(&mut self, batch: &CommandBatch) -> BatchOutcome {
        let mut results: Vec<CommandResult> = Vec::with_capacity(batch.len());
        let mut transcript = String::new();

        for (index, command) in batch.commands.iter().enumerate() {
            debug!(target_name = %self.target_name, index = index, command = %command, "Sending command");

            if let Err(e) = self.transport.send_line(command).await {
                error!(target_name = %self.target_name, index = index, error = %e, "Send failed mid-batch");
                return BatchOutcome {
                    results,
                    transcript,
                    error: Some(e),
                };
            }

            let raw = match self.transport.read_settled(&self.settle, &self.cancel).await {
                Ok(raw) => raw,
                Err(e) => {
                    error!(target_name = %self.target_name, index = index, error = %e, "Read failed mid-batch");
                    return BatchOutcome {
                        results,
                        transcript,
                        error: Some(e),
                    };
                }
            };

            let text = String::from_utf8_lossy(&raw);
            let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
            for line in &lines {
                transcript.push_str(line);
                transcript.push('\n');
            }

            results.push(CommandResult { index, lines });
        }

        BatchOutcome {
            results,
            transcript,
            error: None,
        }
    }

    /// 关闭会话，幂等
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}
