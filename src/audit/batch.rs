//! 命令批次模型
//!
//! 巡检命令是一个有序列表，其中若干位置的输出承载健康检查语义。
//! 位置到检查项的映射是显式配置，调整命令顺序必须同步调整映射，
//! 否则构建批次时直接报错。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{AppError, Result};

/// 健康检查项种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// 机箱（风扇、电源）
    Chassis,
    /// 板卡
    Card,
    /// MDA 模块
    Mda,
}

impl CheckKind {
    /// 报告中的标题
    pub fn title(&self) -> &'static str {
        match self {
            CheckKind::Chassis => "CHASSIS",
            CheckKind::Card => "CARD",
            CheckKind::Mda => "MDA",
        }
    }
}

/// 批次配置（来自配置文件）
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSettings {
    /// 有序命令列表
    #[serde(default = "default_commands")]
    pub commands: Vec<String>,

    /// 命令下标（0 起）到检查项的映射，键为字符串形式的下标
    #[serde(default = "default_checks")]
    pub checks: HashMap<String, CheckKind>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            commands: default_commands(),
            checks: default_checks(),
        }
    }
}

/// 原始巡检命令序列：先关闭分页，再取时间，然后是三条计数命令
fn default_commands() -> Vec<String> {
    vec![
        "environment no more".to_string(),
        "show time".to_string(),
        "show chassis | match \": up\"  | count".to_string(),
        "show card | match up  | count".to_string(),
        "show mda | match up  | count".to_string(),
    ]
}

fn default_checks() -> HashMap<String, CheckKind> {
    let mut checks = HashMap::new();
    checks.insert("2".to_string(), CheckKind::Chassis);
    checks.insert("3".to_string(), CheckKind::Card);
    checks.insert("4".to_string(), CheckKind::Mda);
    checks
}

impl BatchSettings {
    /// 构建校验过的命令批次
    pub fn build(&self) -> Result<CommandBatch> {
        if self.commands.is_empty() {
            return Err(AppError::config("batch.commands must not be empty"));
        }

        let mut checks = BTreeMap::new();
        for (key, kind) in &self.checks {
            let index: usize = key.parse().map_err(|_| {
                AppError::config(format!("batch.checks key is not an index: {}", key))
            })?;
            if index >= self.commands.len() {
                return Err(AppError::config(format!(
                    "batch.checks index {} out of range (batch has {} commands)",
                    index,
                    self.commands.len()
                )));
            }
            checks.insert(index, *kind);
        }

        Ok(CommandBatch {
            commands: self.commands.clone(),
            checks,
        })
    }
}

/// 校验过的命令批次
#[derive(Debug, Clone)]
pub struct CommandBatch {
    /// 有序命令列表
    pub commands: Vec<String>,
    /// 命令下标到检查项的映射
    pub checks: BTreeMap<usize, CheckKind>,
}

impl CommandBatch {
    /// 查询某个下标承载的检查项
    pub fn check_at(&self, index: usize) -> Option<CheckKind> {
        self.checks.get(&index).copied()
    }

    /// 命令数量
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// 单条命令的采集结果
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// 在批次中的下标
    pub index: usize,
    /// 该命令的全部输出行
    pub lines: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_batch_shape() {
        let batch = BatchSettings::default().build().unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.check_at(2), Some(CheckKind::Chassis));
        assert_eq!(batch.check_at(3), Some(CheckKind::Card));
        assert_eq!(batch.check_at(4), Some(CheckKind::Mda));
        assert_eq!(batch.check_at(0), None);
        assert_eq!(batch.check_at(1), None);
    }

    #[test]
    fn test_build_rejects_empty_commands() {
        let settings = BatchSettings {
            commands: vec![],
            checks: HashMap::new(),
        };
        let err = settings.build().unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_build_rejects_out_of_range_index() {
        let mut checks = HashMap::new();
        checks.insert("9".to_string(), CheckKind::Chassis);
        let settings = BatchSettings {
            commands: vec!["show time".to_string()],
            checks,
        };
        let err = settings.build().unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_build_rejects_non_numeric_index() {
        let mut checks = HashMap::new();
        checks.insert("chassis".to_string(), CheckKind::Chassis);
        let settings = BatchSettings {
            commands: vec!["show chassis".to_string()],
            checks,
        };
        let err = settings.build().unwrap_err();
        assert!(err.to_string().contains("not an index"));
    }

    #[test]
    fn test_check_kind_serialization() {
        let kinds = vec![
            (CheckKind::Chassis, "chassis"),
            (CheckKind::Card, "card"),
            (CheckKind::Mda, "mda"),
        ];
        for (kind, expected) in kinds {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", expected));
        }
    }
}
