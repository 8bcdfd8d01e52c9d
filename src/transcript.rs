//! 成绩单落盘
//! 纯副作用写入，无业务逻辑。目录按设备名前缀分组，
//! 同名重复保存是覆盖语义

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{AppError, Result};

/// 分组目录取设备名的前缀长度（按字符数，避免切到多字节边界）
const GROUP_PREFIX_CHARS: usize = 10;

/// 成绩单存储
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// 某台设备的成绩单最终位置
    pub fn path_for(&self, target_name: &str) -> PathBuf {
        let prefix: String = target_name.chars().take(GROUP_PREFIX_CHARS).collect();
        self.base_dir.join(prefix).join(format!("{}.log", target_name))
    }

    /// 保存一台设备的完整成绩单，返回写入路径
    ///
    /// 覆盖语义：同一设备保存两次，落盘内容等于保存一次。
    pub async fn save(&self, target_name: &str, transcript: &str) -> Result<PathBuf> {
        let path = self.path_for(target_name);
        let dir = path.parent().unwrap_or(Path::new("."));

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AppError::store(format!("create {}: {}", dir.display(), e)))?;

        tokio::fs::write(&path, transcript)
            .await
            .map_err(|e| AppError::store(format!("write {}: {}", path.display(), e)))?;

        debug!(target_name = %target_name, path = %path.display(), "Transcript saved");
        Ok(path)
    }
}
