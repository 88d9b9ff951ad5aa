//! 决策类型与决策策略接口
//!
//! Decision 是封闭的 tagged enum：research 必须携带 focus_areas，调用点由编译器穷尽检查。

use serde::{Deserialize, Serialize};

use crate::addm::quality::QualityMetrics;
use crate::addm::state::SectionKind;
use crate::config::WorkflowMode;
use crate::core::CoordinationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    /// 入口：产出基础章节
    Initial,
    /// 追加一个独立的扩展章节，只覆盖 focus_areas
    Research { focus_areas: Vec<String> },
    /// 产出唯一的综合章节并结束
    Enhance,
    /// 不再产出内容，最后一个章节即结果
    Complete,
}

impl Decision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::Initial => DecisionKind::Initial,
            Decision::Research { .. } => DecisionKind::Research,
            Decision::Enhance => DecisionKind::Enhance,
            Decision::Complete => DecisionKind::Complete,
        }
    }

    /// 该决策产出的章节类型；Complete 不产出
    pub fn section_kind(&self) -> Option<SectionKind> {
        match self {
            Decision::Initial => Some(SectionKind::Initial),
            Decision::Research { .. } => Some(SectionKind::Research),
            Decision::Enhance => Some(SectionKind::Enhance),
            Decision::Complete => None,
        }
    }
}

/// 不带载荷的决策种类，用于 DDM 备选项与日志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Initial,
    Research,
    Enhance,
    Complete,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Initial => "initial",
            DecisionKind::Research => "research",
            DecisionKind::Enhance => "enhance",
            DecisionKind::Complete => "complete",
        }
    }
}

/// 结构化的改进指引：由提示词编译器转成系统指令，而不是直接拼接自由文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementStrategy {
    pub kind: DecisionKind,
    pub focus_areas: Vec<String>,
    pub constraints: Vec<String>,
    #[serde(default)]
    pub target_improvements: Vec<String>,
    #[serde(default)]
    pub research_directions: Vec<String>,
    pub iteration: usize,
}

impl RefinementStrategy {
    pub fn enhance(metrics: &QualityMetrics, iteration: usize) -> Self {
        Self {
            kind: DecisionKind::Enhance,
            focus_areas: vec![
                "clarity and coherence".into(),
                "structural organization".into(),
                "depth and detail".into(),
            ],
            constraints: vec![
                "maintain factual accuracy".into(),
                "keep every key insight from the source sections".into(),
                "expand on underdeveloped points".into(),
            ],
            target_improvements: metrics.improvement_targets(),
            research_directions: Vec::new(),
            iteration,
        }
    }

    pub fn research(metrics: &QualityMetrics, mode: WorkflowMode, iteration: usize) -> Self {
        Self {
            kind: DecisionKind::Research,
            focus_areas: vec![
                "additional evidence and examples".into(),
                "alternative perspectives".into(),
                "supporting data and citations".into(),
            ],
            constraints: vec![
                "cover only material absent from the existing content".into(),
                "prioritize credible sources".into(),
            ],
            target_improvements: Vec::new(),
            research_directions: metrics.research_directions(mode),
            iteration,
        }
    }
}

/// 一次决策的完整结果
#[derive(Debug, Clone, Serialize)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub confidence: f64,
    pub reaction_time_ms: f64,
    pub reasoning: String,
    pub metrics: QualityMetrics,
    pub strategy: Option<RefinementStrategy>,
    /// 上下文 + 当前内容过长，建议先做摘要
    pub should_summarize: bool,
}

impl DecisionOutcome {
    /// 不经模拟直接给出的决策（强制转移、测试用策略）
    pub fn fixed(decision: Decision, reasoning: impl Into<String>) -> Self {
        Self {
            decision,
            confidence: 1.0,
            reaction_time_ms: 0.0,
            reasoning: reasoning.into(),
            metrics: QualityMetrics::default(),
            strategy: None,
            should_summarize: false,
        }
    }
}

/// 决策输入：刚产出的章节内容与之前的上下文
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub content: &'a str,
    pub context: &'a str,
    pub workflow_mode: WorkflowMode,
    /// 刚产出章节的序号（从 0 开始）
    pub iteration: usize,
    pub max_iterations: usize,
    pub confidence_threshold: f64,
    pub summarization_threshold: usize,
}

/// 决策函数：在每个章节产出并评分后选择下一步
///
/// 同步且不阻塞；循环会在它之后再施加上限与 facet 去重规则。
pub trait DecisionPolicy: Send + Sync {
    fn decide(&self, input: &DecisionInput<'_>) -> Result<DecisionOutcome, CoordinationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_kind_mapping() {
        assert_eq!(Decision::Initial.section_kind(), Some(SectionKind::Initial));
        assert_eq!(
            Decision::Research { focus_areas: vec!["x".into()] }.section_kind(),
            Some(SectionKind::Research)
        );
        assert_eq!(Decision::Enhance.section_kind(), Some(SectionKind::Enhance));
        assert_eq!(Decision::Complete.section_kind(), None);
    }

    #[test]
    fn test_decision_serializes_with_tag() {
        let json = serde_json::to_value(Decision::Research {
            focus_areas: vec!["historical context".into()],
        })
        .unwrap();
        assert_eq!(json["type"], "research");
        assert_eq!(json["focus_areas"][0], "historical context");
    }

    #[test]
    fn test_strategies_carry_gap_analysis() {
        let metrics = QualityMetrics::analyze("short");
        let enhance = RefinementStrategy::enhance(&metrics, 1);
        assert_eq!(enhance.kind, DecisionKind::Enhance);
        assert!(enhance.target_improvements.contains(&"add concrete examples".to_string()));
        let research = RefinementStrategy::research(&metrics, WorkflowMode::NewsAnalysis, 1);
        assert!(research
            .research_directions
            .contains(&"explore alternative viewpoints".to_string()));
    }
}
