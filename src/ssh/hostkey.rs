//! 主机密钥验证
//! 跳板机和目标设备共用同一套验证策略

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// 主机密钥验证策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受已知的主机密钥
    Strict,
    /// 接受模式：首次连接时接受新密钥，之后验证
    #[default]
    Accept,
    /// 禁用验证（不安全，仅用于实验室环境）
    Disabled,
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

/// russh 客户端会话处理器，按策略校验服务端密钥
pub struct HostKeyChecker {
    pub verification_mode: HostKeyVerification,
    pub known_hosts: Option<HashMap<String, String>>,
    pub host: String,
    pub port: u16,
}

impl HostKeyChecker {
    pub fn new(
        verification_mode: HostKeyVerification,
        known_hosts: Option<HashMap<String, String>>,
        host: String,
        port: u16,
    ) -> Self {
        Self {
            verification_mode,
            known_hosts,
            host,
            port,
        }
    }

    fn fingerprint(server_public_key: &PublicKey) -> String {
        let key_data = server_public_key.public_key_base64();
        let mut hasher = sha2::Sha256::new();
        hasher.update(key_data.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl client::Handler for HostKeyChecker {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let host_key = format!("{}:{}", self.host, self.port);

        match self.verification_mode {
            HostKeyVerification::Disabled => {
                warn!(
                    host = %self.host,
                    port = self.port,
                    "Host key verification DISABLED - accepting all keys"
                );
                Ok(true)
            }
            HostKeyVerification::Accept => {
                let fingerprint = Self::fingerprint(server_public_key);

                if let Some(known_hosts) = &self.known_hosts {
                    if let Some(stored_fingerprint) = known_hosts.get(&host_key) {
                        if stored_fingerprint == &fingerprint {
                            debug!(host = %host_key, "Host key verified");
                            return Ok(true);
                        }
                        error!(
                            host = %host_key,
                            expected = %stored_fingerprint,
                            actual = %fingerprint,
                            "Host key mismatch - POSSIBLE SECURITY BREACH"
                        );
                        return Ok(false);
                    }
                }

                info!(
                    host = %host_key,
                    fingerprint = %fingerprint,
                    "First time connecting - accepting host key"
                );
                Ok(true)
            }
            HostKeyVerification::Strict => {
                let fingerprint = Self::fingerprint(server_public_key);

                if let Some(known_hosts) = &self.known_hosts {
                    if let Some(stored_fingerprint) = known_hosts.get(&host_key) {
                        if stored_fingerprint == &fingerprint {
                            debug!(host = %host_key, "Host key verified (strict mode)");
                            return Ok(true);
                        }
                        error!(
                            host = %host_key,
                            expected = %stored_fingerprint,
                            actual = %fingerprint,
                            "Host key mismatch - REJECTING CONNECTION"
                        );
                        return Ok(false);
                    }
                }

                error!(
                    host = %host_key,
                    "Unknown host in strict mode - rejecting connection"
                );
                Ok(false)
            }
        }
    }
}
