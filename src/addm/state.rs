//! ADDM 循环状态：当前轮次、上限、已产出章节
//!
//! 只由循环驱动方修改；push_section 是推进 current_iteration 的唯一入口，
//! 每产出一个章节恰好 +1，且永不超过 max_iterations。

use serde::{Deserialize, Serialize};

use crate::addm::decision::Decision;
use crate::core::CoordinationError;

/// 章节类型：每个章节恰有一种
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Initial,
    Research,
    Enhance,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Initial => "initial",
            SectionKind::Research => "research",
            SectionKind::Enhance => "enhance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initial" => Some(SectionKind::Initial),
            "research" => Some(SectionKind::Research),
            "enhance" => Some(SectionKind::Enhance),
            _ => None,
        }
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个独立生成、带类型标签的内容片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub kind: SectionKind,
    pub label: String,
    pub content: String,
    /// 产出该章节时的轮次（从 1 开始）
    pub iteration: usize,
    /// 启发式质量分 [0, 1]
    pub quality: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopState {
    pub current_iteration: usize,
    pub max_iterations: usize,
    pub last_decision: Option<Decision>,
    /// 按产出顺序
    pub sections: Vec<Section>,
    /// 已经请求过的研究方向，新的 research 不得重复
    pub requested_facets: Vec<String>,
    pub error: Option<String>,
}

impl LoopState {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..Default::default()
        }
    }

    pub fn at_ceiling(&self) -> bool {
        self.current_iteration >= self.max_iterations
    }

    pub fn research_count(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| s.kind == SectionKind::Research)
            .count()
    }

    pub fn has_enhance(&self) -> bool {
        self.sections.iter().any(|s| s.kind == SectionKind::Enhance)
    }

    /// 下一个 kind 章节的标签
    pub fn next_label(&self, kind: SectionKind) -> String {
        match kind {
            SectionKind::Initial => "Initial Response".to_string(),
            SectionKind::Research => format!("Research Expansion {}", self.research_count() + 1),
            SectionKind::Enhance => "Enhanced Synthesis".to_string(),
        }
    }

    /// 追加章节并推进轮次；已达上限时拒绝
    pub fn push_section(
        &mut self,
        kind: SectionKind,
        content: String,
        quality: f64,
    ) -> Result<&Section, CoordinationError> {
        if self.at_ceiling() {
            return Err(CoordinationError::Configuration(format!(
                "iteration ceiling {} reached, cannot add {kind} section",
                self.max_iterations
            )));
        }
        let label = self.next_label(kind);
        self.current_iteration += 1;
        self.sections.push(Section {
            kind,
            label,
            content,
            iteration: self.current_iteration,
            quality,
        });
        Ok(&self.sections[self.sections.len() - 1])
    }

    pub fn mark_requested(&mut self, facets: &[String]) {
        for f in facets {
            if !self.requested_facets.iter().any(|r| r.eq_ignore_ascii_case(f)) {
                self.requested_facets.push(f.clone());
            }
        }
    }

    pub fn is_requested(&self, facet: &str) -> bool {
        self.requested_facets.iter().any(|r| r.eq_ignore_ascii_case(facet))
    }

    pub fn last_section(&self) -> Option<&Section> {
        self.sections.last()
    }

    /// 面向用户的结果：有 enhance 章节时取它，否则取最后一个章节
    pub fn final_section(&self) -> Option<&Section> {
        self.sections
            .iter()
            .rev()
            .find(|s| s.kind == SectionKind::Enhance)
            .or_else(|| self.sections.last())
    }

    /// 除最后一个章节外的内容，作为决策时的上下文
    pub fn prior_context(&self) -> String {
        let n = self.sections.len().saturating_sub(1);
        self.sections[..n]
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
