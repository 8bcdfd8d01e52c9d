//! SSH 传输层：跳板机中继、设备会话、主机密钥验证

pub mod factory;
pub mod hostkey;
pub mod relay;
pub mod session;

pub use factory::{SessionFactory, SshSessionFactory};
pub use hostkey::{HostKeyChecker, HostKeyVerification};
pub use relay::RelayConnection;
pub use session::{
    AuthMethod, BatchOutcome, DeviceSession, SessionSettings, SettleStrategy, ShellTransport,
    SshShell,
};
