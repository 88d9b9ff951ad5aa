//! 章节质量评估
//!
//! HeuristicScorer 只看文本特征（长度、段落、结构标记、示例、数据、来源），不调用模型；
//! 需要模型打分时实现 QualityScorer 注入即可。

use serde::{Deserialize, Serialize};

use crate::config::WorkflowMode;

/// 内容的可观测特征
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub char_count: usize,
    pub paragraph_count: usize,
    pub has_structure: bool,
    pub has_examples: bool,
    pub has_sources: bool,
    pub has_data: bool,
    pub has_contrast: bool,
    pub has_background: bool,
    /// 综合分 [0, 1]
    pub score: f64,
}

impl QualityMetrics {
    pub fn analyze(content: &str) -> Self {
        let lower = content.to_lowercase();
        let paragraph_count = content
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .count();
        let mut m = Self {
            char_count: content.chars().count(),
            paragraph_count,
            has_structure: ["##", "**", "1.", "•", "\n- "]
                .iter()
                .any(|marker| content.contains(marker)),
            has_examples: lower.contains("for example") || lower.contains("such as"),
            has_sources: lower.contains("according to") || lower.contains("research shows"),
            has_data: content.chars().any(|c| c.is_ascii_digit()),
            has_contrast: lower.contains("however") || lower.contains("alternatively"),
            has_background: lower.contains("background") || lower.contains("context"),
            score: 0.0,
        };
        m.score = m.heuristic_score();
        m
    }

    fn heuristic_score(&self) -> f64 {
        let length = (self.char_count as f64 / 1500.0).min(1.0);
        let paragraphs = (self.paragraph_count as f64 / 4.0).min(1.0);
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let score = 0.30 * length
            + 0.15 * paragraphs
            + 0.15 * flag(self.has_structure)
            + 0.15 * flag(self.has_examples)
            + 0.10 * flag(self.has_data)
            + 0.15 * flag(self.has_sources);
        score.clamp(0.0, 1.0)
    }

    /// 需要改进的方面（enhance 用）
    pub fn improvement_targets(&self) -> Vec<String> {
        let mut gaps = Vec::new();
        if self.paragraph_count < 3 {
            gaps.push("expand sectional coverage");
        }
        if !self.has_examples {
            gaps.push("add concrete examples");
        }
        if !self.has_structure {
            gaps.push("improve structural organization");
        }
        if gaps.is_empty() {
            gaps.push("general refinement");
        }
        gaps.into_iter().map(String::from).collect()
    }

    /// 尚未覆盖的研究方向（research 用），随工作流模式不同
    pub fn research_directions(&self, mode: WorkflowMode) -> Vec<String> {
        let mut areas = Vec::new();
        match mode {
            WorkflowMode::ResearchAssembly => {
                if !self.has_sources {
                    areas.push("add authoritative sources and citations");
                }
                if !self.has_data {
                    areas.push("include relevant statistics and data");
                }
            }
            WorkflowMode::NewsAnalysis => {
                if !self.has_contrast {
                    areas.push("explore alternative viewpoints");
                }
                if !self.has_background {
                    areas.push("provide historical context");
                }
            }
        }
        if areas.is_empty() {
            areas.push("expand topical coverage");
        }
        areas.into_iter().map(String::from).collect()
    }
}

pub trait QualityScorer: Send + Sync {
    /// 返回 [0, 1] 的质量分
    fn score(&self, content: &str) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl QualityScorer for HeuristicScorer {
    fn score(&self, content: &str) -> f64 {
        QualityMetrics::analyze(content).score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RICH: &str = "## Overview\n\nAccording to the 2023 survey, 64% of teams adopted it.\n\n\
        For example, the storage team cut latency by 40 ms.\n\n\
        However, the background matters: older systems lack support.";

    #[test]
    fn test_rich_content_scores_higher() {
        let thin = HeuristicScorer.score("short answer");
        let rich = HeuristicScorer.score(RICH);
        assert!(rich > thin);
        assert!((0.0..=1.0).contains(&rich));
        assert!((0.0..=1.0).contains(&thin));
    }

    #[test]
    fn test_gap_analysis_on_thin_content() {
        let m = QualityMetrics::analyze("plain text without anything");
        assert_eq!(
            m.improvement_targets(),
            vec![
                "expand sectional coverage",
                "add concrete examples",
                "improve structural organization"
            ]
        );
        assert_eq!(
            m.research_directions(WorkflowMode::ResearchAssembly),
            vec![
                "add authoritative sources and citations",
                "include relevant statistics and data"
            ]
        );
        assert_eq!(
            m.research_directions(WorkflowMode::NewsAnalysis),
            vec!["explore alternative viewpoints", "provide historical context"]
        );
    }

    #[test]
    fn test_covered_content_falls_back_to_generic_targets() {
        let m = QualityMetrics::analyze(RICH);
        assert!(m.has_sources && m.has_data && m.has_examples && m.has_structure);
        assert_eq!(m.improvement_targets(), vec!["general refinement"]);
        assert_eq!(
            m.research_directions(WorkflowMode::ResearchAssembly),
            vec!["expand topical coverage"]
        );
    }
}
