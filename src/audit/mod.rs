//! 巡检领域模型：命令批次、健康提取、报告

pub mod batch;
pub mod extractor;
pub mod report;

pub use batch::{BatchSettings, CheckKind, CommandBatch, CommandResult};
pub use extractor::{extract, CheckProfile, DeviceProfile, HealthFinding, HealthStatus};
pub use report::{render_markdown, FleetReport, TargetReport};
