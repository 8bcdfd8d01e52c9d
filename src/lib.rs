//! 机群巡检库
//! 提供配置、SSH 会话、健康提取与报告的共享类型

pub mod audit;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod ssh;
pub mod telemetry;
pub mod transcript;
