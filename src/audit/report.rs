//! 巡检报告模型与渲染
//!
//! 一次巡检产出一份 FleetReport：每台设备一个条目，按配置顺序排列。
//! 渲染为 markdown 供人工查阅，核心逻辑不关心展示细节。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::batch::CommandBatch;
use super::extractor::{HealthFinding, HealthStatus};

/// 单台设备的报告条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    /// 设备名
    pub target: String,

    /// 健康结论，按检查项出现顺序排列
    pub findings: Vec<HealthFinding>,

    /// 采集失败原因（成功采集时为 None）
    pub error: Option<String>,
}

impl TargetReport {
    /// 成功采集的条目
    pub fn collected(target: String, findings: Vec<HealthFinding>) -> Self {
        Self {
            target,
            findings,
            error: None,
        }
    }

    /// 采集失败的降级条目：每个配置的检查项都记为待复查
    pub fn degraded(target: String, batch: &CommandBatch, reason: &str) -> Self {
        let detail = format!("collection failed: {}", reason);
        let findings = batch
            .checks
            .values()
            .map(|kind| HealthFinding {
                target: target.clone(),
                kind: *kind,
                status: HealthStatus::NeedsReview,
                details: vec![detail.clone()],
            })
            .collect();

        Self {
            target,
            findings,
            error: Some(detail),
        }
    }

    /// 是否完整采集成功
    pub fn is_collected(&self) -> bool {
        self.error.is_none()
    }

    /// 是否全部检查项 OK
    pub fn is_healthy(&self) -> bool {
        self.is_collected()
            && self
                .findings
                .iter()
                .all(|f| f.status == HealthStatus::Ok)
    }
}

/// 全量巡检报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    /// 报告生成时间
    pub generated_at: DateTime<Utc>,

    pub entries: Vec<TargetReport>,
}

impl FleetReport {
    pub fn new(entries: Vec<TargetReport>) -> Self {
        Self {
            generated_at: Utc::now(),
            entries,
        }
    }

    /// 待复查或采集失败的设备数
    pub fn needs_review_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_healthy()).count()
    }
}

/// 渲染为 markdown（每台设备一节，检查项各一个代码块）
pub fn render_markdown(report: &FleetReport) -> String {
    let mut out = String::new();

    for entry in &report.entries {
        out.push_str(&format!("<center><b> {} </b></center>\n", entry.target));

        if let Some(reason) = &entry.error {
            out.push_str("```\n");
            out.push_str(&format!(" NOT OK: {}\n", reason));
            out.push_str("```\n");
        }

        for finding in &entry.findings {
            out.push_str(&format!("##### {}:\n", finding.kind.title()));
            out.push_str("```\n");
            for detail in &finding.details {
                out.push_str(&format!(" {}\n", detail));
            }
            out.push_str("```\n");
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "Report generated at {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::batch::{BatchSettings, CheckKind};

    fn ok_finding(target: &str, kind: CheckKind) -> HealthFinding {
        HealthFinding {
            target: target.to_string(),
            kind,
            status: HealthStatus::Ok,
            details: vec!["OK: all up.".to_string()],
        }
    }

    #[test]
    fn test_degraded_entry_covers_every_check() {
        let batch = BatchSettings::default().build().unwrap();
        let entry = TargetReport::degraded("wbx-2".to_string(), &batch, "channel open failed");

        assert!(!entry.is_collected());
        assert_eq!(entry.findings.len(), 3);
        for finding in &entry.findings {
            assert_eq!(finding.status, HealthStatus::NeedsReview);
            assert!(finding.details[0].starts_with("collection failed:"));
        }
        assert_eq!(entry.error.as_deref(), Some("collection failed: channel open failed"));
    }

    #[test]
    fn test_healthy_entry() {
        let entry = TargetReport::collected(
            "wbx-1".to_string(),
            vec![
                ok_finding("wbx-1", CheckKind::Chassis),
                ok_finding("wbx-1", CheckKind::Card),
            ],
        );
        assert!(entry.is_healthy());
    }

    #[test]
    fn test_needs_review_count() {
        let batch = BatchSettings::default().build().unwrap();
        let report = FleetReport::new(vec![
            TargetReport::collected(
                "wbx-1".to_string(),
                vec![ok_finding("wbx-1", CheckKind::Chassis)],
            ),
            TargetReport::degraded("wbx-2".to_string(), &batch, "timeout"),
        ]);
        assert_eq!(report.needs_review_count(), 1);
    }

    #[test]
    fn test_render_markdown_sections() {
        let report = FleetReport::new(vec![TargetReport::collected(
            "wbx-1".to_string(),
            vec![ok_finding("wbx-1", CheckKind::Chassis)],
        )]);

        let md = render_markdown(&report);
        assert!(md.contains("<center><b> wbx-1 </b></center>"));
        assert!(md.contains("##### CHASSIS:"));
        assert!(md.contains(" OK: all up."));
    }

    #[test]
    fn test_render_markdown_degraded_entry() {
        let batch = BatchSettings::default().build().unwrap();
        let report = FleetReport::new(vec![TargetReport::degraded(
            "wbx-2".to_string(),
            &batch,
            "device unreachable: timeout",
        )]);

        let md = render_markdown(&report);
        assert!(md.contains("NOT OK: collection failed: device unreachable: timeout"));
    }
}
