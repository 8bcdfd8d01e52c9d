//! 配置系统
//! 从 YAML 清单加载跳板机、目标设备列表、命令批次和设备档案，
//! 支持 ATP_ 前缀的环境变量覆盖；敏感信息用 Secret 包装防止日志泄露

use config::{Config, Environment, File, FileFormat};
use secrecy::Secret;
use serde::Deserialize;

use crate::audit::batch::BatchSettings;
use crate::audit::extractor::DeviceProfile;
use crate::error::{AppError, Result};
use crate::ssh::session::{AuthMethod, SessionSettings};

fn default_ssh_port() -> u16 {
    22
}

/// 一台目标设备
#[derive(Debug, Clone, Deserialize)]
pub struct Target {
    /// 设备名（唯一，用作成绩单文件名）
    pub name: String,

    /// 主机地址
    pub host: String,

    /// 端口
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// 用户名
    pub username: String,

    /// 密码（使用 Secret 包装，防止日志泄露）
    #[serde(default)]
    pub password: Option<Secret<String>>,

    /// 私钥文件路径（可选，优先于密码）
    #[serde(default)]
    pub private_key_file: Option<String>,

    /// 私钥密码（可选）
    #[serde(default)]
    pub passphrase: Option<Secret<String>>,
}

impl Target {
    /// 构建认证方式，私钥优先
    pub fn auth(&self) -> Result<AuthMethod> {
        build_auth(
            &self.private_key_file,
            &self.passphrase,
            &self.password,
            &self.name,
        )
    }

    /// 目标地址字符串
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 跳板机配置
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    /// 是否经由跳板机（false 表示 VPN / 扁平网络直连）
    #[serde(rename = "use", default)]
    pub use_relay: bool,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    /// 密码（使用 Secret 包装）
    #[serde(default)]
    pub password: Option<Secret<String>>,

    /// 私钥文件路径（可选）
    #[serde(default)]
    pub private_key_file: Option<String>,

    /// 私钥密码（可选）
    #[serde(default)]
    pub passphrase: Option<Secret<String>>,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            use_relay: false,
            host: String::new(),
            port: default_ssh_port(),
            username: String::new(),
            password: None,
            private_key_file: None,
            passphrase: None,
        }
    }
}

impl RelaySettings {
    pub fn auth(&self) -> Result<AuthMethod> {
        build_auth(&self.private_key_file, &self.passphrase, &self.password, "relay")
    }
}

fn build_auth(
    key_file: &Option<String>,
    passphrase: &Option<Secret<String>>,
    password: &Option<Secret<String>>,
    who: &str,
) -> Result<AuthMethod> {
    if let Some(path) = key_file {
        return Ok(AuthMethod::KeyFile {
            path: path.clone(),
            passphrase: passphrase.clone(),
        });
    }
    if let Some(password) = password {
        return Ok(AuthMethod::Password(password.clone()));
    }
    Err(AppError::config(format!(
        "{}: neither password nor private_key_file configured",
        who
    )))
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 日志格式: json, pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// 成绩单落盘配置
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptSettings {
    /// 根目录
    #[serde(default = "default_transcript_dir")]
    pub base_dir: String,
}

fn default_transcript_dir() -> String {
    "tmp".to_string()
}

impl Default for TranscriptSettings {
    fn default() -> Self {
        Self {
            base_dir: default_transcript_dir(),
        }
    }
}

/// 并发配置
#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencySettings {
    /// 同时在途的设备会话上限（1 即严格串行）
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_max_sessions() -> usize {
    1
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub relay: RelaySettings,

    /// 目标设备列表（必填）
    pub targets: Vec<Target>,

    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub profile: DeviceProfile,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub transcript: TranscriptSettings,

    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从 YAML 清单加载，环境变量（前缀 ATP_）可覆盖
    pub fn load(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::new(path, FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("ATP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(AppError::config("targets must not be empty"));
        }

        let mut seen = std::collections::HashSet::new();
        for target in &self.targets {
            if target.name.is_empty() {
                return Err(AppError::config("target name must not be empty"));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(AppError::config(format!("duplicate target name: {}", target.name)));
            }
            // 认证方式在启动时就检查，而不是连到一半才发现
            target.auth()?;
        }

        if self.relay.use_relay {
            if self.relay.host.is_empty() || self.relay.username.is_empty() {
                return Err(AppError::config(
                    "relay.host and relay.username are required when relay.use is true",
                ));
            }
            self.relay.auth()?;
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(AppError::config(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(AppError::config(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.concurrency.max_sessions == 0 {
            return Err(AppError::config("concurrency.max_sessions must be >= 1"));
        }

        // 批次与映射的一致性
        self.batch.build()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const SAMPLE_YAML: &str = r#"
relay:
  use: true
  host: 192.0.2.10
  username: ops
  password: relay-secret

targets:
  - name: wbx-1
    host: 10.1.0.1
    port: 22
    username: admin
    password: device-secret
  - name: wbx-2
    host: 10.1.0.2
    username: admin
    password: device-secret

logging:
  level: debug
  format: json
"#;

    fn write_sample(contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("atp-test-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_load_sample_yaml() {
        let path = write_sample(SAMPLE_YAML);
        let config = AppConfig::load(path.to_str().unwrap()).unwrap();

        assert!(config.relay.use_relay);
        assert_eq!(config.relay.host, "192.0.2.10");
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].name, "wbx-1");
        assert_eq!(config.targets[1].port, 22);
        assert_eq!(config.logging.level, "debug");
        // 省略的段落落到默认值
        assert_eq!(config.transcript.base_dir, "tmp");
        assert_eq!(config.concurrency.max_sessions, 1);
        assert_eq!(config.batch.commands.len(), 5);
        assert_eq!(config.profile.chassis.expected_lines, 7);

        std::fs::remove_file(path).ok();
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("ATP_CONCURRENCY__MAX_SESSIONS", "4");

        let path = write_sample(SAMPLE_YAML);
        let config = AppConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.concurrency.max_sessions, 4);

        std::env::remove_var("ATP_CONCURRENCY__MAX_SESSIONS");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_validate_rejects_empty_targets() {
        let config = AppConfig {
            relay: RelaySettings::default(),
            targets: vec![],
            batch: BatchSettings::default(),
            profile: DeviceProfile::default(),
            session: SessionSettings::default(),
            transcript: TranscriptSettings::default(),
            concurrency: ConcurrencySettings::default(),
            logging: LoggingConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    fn minimal_config() -> AppConfig {
        AppConfig {
            relay: RelaySettings::default(),
            targets: vec![Target {
                name: "wbx-1".to_string(),
                host: "10.1.0.1".to_string(),
                port: 22,
                username: "admin".to_string(),
                password: Some(Secret::new("pw".to_string())),
                private_key_file: None,
                passphrase: None,
            }],
            batch: BatchSettings::default(),
            profile: DeviceProfile::default(),
            session: SessionSettings::default(),
            transcript: TranscriptSettings::default(),
            concurrency: ConcurrencySettings::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_validate_minimal_ok() {
        assert!(minimal_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config = minimal_config();
        config.targets.push(config.targets[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let mut config = minimal_config();
        config.targets[0].password = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("neither password nor private_key_file"));
    }

    #[test]
    fn test_validate_rejects_relay_without_host() {
        let mut config = minimal_config();
        config.relay.use_relay = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("relay.host"));
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = minimal_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sessions() {
        let mut config = minimal_config();
        config.concurrency.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_key_file_takes_precedence() {
        let mut config = minimal_config();
        config.targets[0].private_key_file = Some("/etc/atp/id_ed25519".to_string());
        let auth = config.targets[0].auth().unwrap();
        assert!(matches!(auth, AuthMethod::KeyFile { .. }));
    }
}
