//! 统一错误模型
//! 定义巡检全流程的错误分类：中继级错误终止整个巡检，
//! 设备级错误只影响单台设备

/// 应用错误类型
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    /// 跳板机不可达（致命，任何设备都无法访问）
    #[error("relay unreachable: {0}")]
    RelayUnreachable(String),

    /// 跳板机认证失败（致命）
    #[error("relay authentication failed: {0}")]
    RelayAuthFailed(String),

    /// 隧道通道打开失败（跳过该设备，继续其它设备）
    #[error("channel open failed: {0}")]
    ChannelOpenFailed(String),

    /// 设备不可达
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),

    /// 设备认证失败
    #[error("device authentication failed: {0}")]
    DeviceAuthFailed(String),

    /// 会话中途 IO 错误（已采集的部分结果仍然保留）
    #[error("session io error: {0}")]
    SessionIo(String),

    /// 成绩单落盘失败（非致命，内存中的结论照常上报）
    #[error("transcript store error: {0}")]
    Store(String),

    /// 配置错误（致命）
    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// 是否为终止整个巡检的致命错误
    ///
    /// 中继级和配置错误在任何设备被访问之前就终止巡检；
    /// 其余错误在编排器边界被捕获并降级为单设备的报告条目。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::RelayUnreachable(_) | AppError::RelayAuthFailed(_) | AppError::Config(_)
        )
    }

    // 便捷方法
    pub fn channel(msg: impl Into<String>) -> Self {
        AppError::ChannelOpenFailed(msg.into())
    }

    pub fn session_io(msg: impl Into<String>) -> Self {
        AppError::SessionIo(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        AppError::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 从 config 库错误转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}
