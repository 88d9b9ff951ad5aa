//! 表现注册表：Specialist 与 Approach 两套并行的累计统计
//!
//! 供路由器查询 top performers 与聚合统计；结果写入时按 id 原子更新。

pub mod approach;
pub mod ranking;
pub mod seeds;
pub mod specialist;

use serde::Serialize;

pub use approach::{
    Approach, ApproachOrigin, ApproachRegistry, ApproachStatus, PerformanceMetrics,
    SignatureRequirements, StatusCounts, StyleMetadata,
};
pub use ranking::{classify_trend, QualityTrend, Ranked};
pub use seeds::seed_approaches;
pub use specialist::{domain_concentration, Specialist, SpecialistRegistry};

/// 注册表聚合统计
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RegistryStats {
    pub entries: usize,
    pub total_executions: u64,
    /// 按执行次数加权的平均质量
    pub mean_quality: f64,
}
