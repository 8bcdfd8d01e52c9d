//! 健康信息提取器
//!
//! 把形如 `... Count : 7 lines` 的计数汇总行与设备档案里的期望值比对，
//! 得出 OK / 待复查 的结论。无状态纯函数，期望值全部来自配置，
//! 不在代码里写死任何机型特定的行数或提示文案。

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::batch::{CheckKind, CommandBatch};

/// 计数行匹配：捕获 "`N` lines" 中的 N
static COUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s+lines").unwrap());

/// 检查结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// 符合期望
    Ok,
    /// 需要人工复查
    NeedsReview,
}

/// 单项健康结论
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthFinding {
    /// 设备名
    pub target: String,
    /// 检查项
    pub kind: CheckKind,
    /// 结论
    pub status: HealthStatus,
    /// 可读明细
    pub details: Vec<String>,
}

/// 单个检查项的期望档案
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckProfile {
    /// 期望的匹配行数
    pub expected_lines: u32,
    /// 行数符合期望时输出的明细
    pub up_messages: Vec<String>,
}

/// 设备硬件期望档案
///
/// 默认值复刻 WBX 机型：机箱 7 行（5 风扇 + 2 电源），
/// 板卡与 MDA 各 2 行。其它机型通过配置覆盖。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    #[serde(default = "default_chassis_profile")]
    pub chassis: CheckProfile,

    #[serde(default = "default_card_profile")]
    pub card: CheckProfile,

    #[serde(default = "default_mda_profile")]
    pub mda: CheckProfile,

    /// 计数汇总行的标记子串，只有包含该子串的行才参与提取
    #[serde(default = "default_count_marker")]
    pub count_marker: String,
}

fn default_chassis_profile() -> CheckProfile {
    CheckProfile {
        expected_lines: 7,
        up_messages: vec![
            "OK: We have 5 Fan trays UP.".to_string(),
            "OK: We have 2 Power supplies UP.".to_string(),
        ],
    }
}

fn default_card_profile() -> CheckProfile {
    CheckProfile {
        expected_lines: 2,
        up_messages: vec![
            "OK: The iom-32-100g admin & operational is UP.".to_string(),
            "OK: The sfm-210-WBX admin & operational is UP.".to_string(),
        ],
    }
}

fn default_mda_profile() -> CheckProfile {
    CheckProfile {
        expected_lines: 2,
        up_messages: vec![
            "OK: The mda 1 m16-100g-qsfp28 admin & operational is UP.".to_string(),
            "OK: The mda 2 m16-100g-qsfp28 admin & operational is UP.".to_string(),
        ],
    }
}

fn default_count_marker() -> String {
    "Count".to_string()
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            chassis: default_chassis_profile(),
            card: default_card_profile(),
            mda: default_mda_profile(),
            count_marker: default_count_marker(),
        }
    }
}

impl DeviceProfile {
    /// 取某个检查项的期望
    pub fn check(&self, kind: CheckKind) -> &CheckProfile {
        match kind {
            CheckKind::Chassis => &self.chassis,
            CheckKind::Card => &self.card,
            CheckKind::Mda => &self.mda,
        }
    }
}

/// 从一行输出提取健康结论
///
/// 仅当批次把 `index` 映射到某个检查项、且该行包含计数标记时才产出结论。
/// 行内的 "`N` lines" 计数等于档案期望值记 OK，否则记待复查并指向
/// 已保存的成绩单位置。
pub fn extract(
    profile: &DeviceProfile,
    batch: &CommandBatch,
    index: usize,
    line: &str,
    target: &str,
    transcript_hint: &str,
) -> Option<HealthFinding> {
    let kind = batch.check_at(index)?;

    if !line.contains(&profile.count_marker) {
        return None;
    }

    let check = profile.check(kind);
    let observed = COUNT_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());

    let finding = match observed {
        Some(count) if count == check.expected_lines => HealthFinding {
            target: target.to_string(),
            kind,
            status: HealthStatus::Ok,
            details: check.up_messages.clone(),
        },
        _ => HealthFinding {
            target: target.to_string(),
            kind,
            status: HealthStatus::NeedsReview,
            details: vec![format!(
                "NOT OK: Requires further analysis [go to {}]",
                transcript_hint
            )],
        },
    };

    Some(finding)
}
