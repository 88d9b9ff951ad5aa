//! 提示词一致性校验
//!
//! - system 提示词必须带有对应章节类型的标签
//! - research 提示词必须列出每个 focus area
//! - initial 提示词不得提到轮次
//! - 生成内容的提示词（initial / research）不得含合并、去重类指令；enhance / compile 豁免，去重本来就是它们的工作

use crate::core::CoordinationError;
use crate::prompt::compiler::{PromptKind, PromptPair};

/// 被弃用的「先重叠生成、再自由文本去重/合并」做法的特征短语（小写匹配）
pub const FORBIDDEN_PHRASES: &[&str] = &[
    "deduplicate",
    "de-duplicate",
    "eliminate duplicate",
    "eliminating duplicate",
    "remove duplicate",
    "removing duplicate",
    "eliminate redundancy",
    "eliminating redundancy",
    "merge the following",
    "merge with the previous",
    "merge it with",
    "combine with the previous response",
    "enhance and refine the previous response",
    "rewrite the previous response",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptValidator;

impl PromptValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, pair: &PromptPair) -> Result<(), CoordinationError> {
        let tag = pair.kind.tag();
        if !pair.system.contains(&tag) {
            return Err(reject(format!("system prompt is missing label {tag}")));
        }

        if let PromptKind::Research { .. } = pair.kind {
            if pair.focus_areas.is_empty() {
                return Err(reject("research prompt has no focus areas".to_string()));
            }
            if let Some(missing) = pair
                .focus_areas
                .iter()
                .find(|area| !pair.system.contains(area.as_str()))
            {
                return Err(reject(format!("research prompt does not list focus area '{missing}'")));
            }
        }

        if pair.kind == PromptKind::Initial && pair.system.to_lowercase().contains("iteration") {
            return Err(reject("initial prompt mentions iterations".to_string()));
        }

        if pair.kind.is_content_generation() {
            if let Some(phrase) = find_forbidden_phrase(&pair.system) {
                return Err(reject(format!(
                    "content prompt contains merge/dedup instruction '{phrase}'"
                )));
            }
        }
        Ok(())
    }
}

/// 返回第一个命中的禁用短语
pub fn find_forbidden_phrase(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    FORBIDDEN_PHRASES.iter().copied().find(|p| lower.contains(p))
}

fn reject(reason: String) -> CoordinationError {
    tracing::warn!(%reason, "prompt rejected");
    CoordinationError::PromptRejected(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addm::{Decision, LoopState, SectionKind};
    use crate::config::WorkflowMode;
    use crate::prompt::{PromptContext, SectionedPromptCompiler};

    fn research_pair() -> PromptPair {
        let mut state = LoopState::new(5);
        state
            .push_section(SectionKind::Initial, "base".into(), 0.5)
            .unwrap();
        state
            .push_section(SectionKind::Research, "first".into(), 0.5)
            .unwrap();
        let ctx = PromptContext::new("Explain tides", WorkflowMode::ResearchAssembly);
        SectionedPromptCompiler::new()
            .compile(
                &Decision::Research {
                    focus_areas: vec!["provide historical context".into()],
                },
                &state,
                &ctx,
            )
            .unwrap()
    }

    #[test]
    fn test_compiled_prompts_pass() {
        let validator = PromptValidator::new();
        let pair = research_pair();
        assert_eq!(pair.kind, PromptKind::Research { index: 2 });
        assert!(validator.validate(&pair).is_ok());
        assert!(find_forbidden_phrase(&pair.system).is_none());
        assert!(find_forbidden_phrase(&pair.user).is_none());
    }

    #[test]
    fn test_forbidden_phrase_rejected_in_research() {
        let mut pair = research_pair();
        pair.system
            .push_str("\nFinally, deduplicate the text against the previous answer.");
        let err = PromptValidator::new().validate(&pair).unwrap_err();
        assert!(matches!(err, CoordinationError::PromptRejected(_)));
    }

    #[test]
    fn test_enhance_and_compile_are_exempt() {
        let mut state = LoopState::new(5);
        state
            .push_section(SectionKind::Initial, "base".into(), 0.5)
            .unwrap();
        let ctx = PromptContext::new("Explain tides", WorkflowMode::ResearchAssembly);
        let compiler = SectionedPromptCompiler::new();
        let enhance = compiler.compile(&Decision::Enhance, &state, &ctx).unwrap();
        assert!(find_forbidden_phrase(&enhance.system).is_some());
        assert!(PromptValidator::new().validate(&enhance).is_ok());
        let compile = compiler.compile_document(&state.sections, &ctx).unwrap();
        assert!(PromptValidator::new().validate(&compile).is_ok());
    }

    #[test]
    fn test_missing_label_and_focus_rejected() {
        let mut pair = research_pair();
        pair.system = pair.system.replace("[SECTION:RESEARCH-2]", "");
        assert!(PromptValidator::new().validate(&pair).is_err());

        let mut pair = research_pair();
        pair.focus_areas.push("an area that was never listed".into());
        assert!(PromptValidator::new().validate(&pair).is_err());
    }

    #[test]
    fn test_initial_prompt_mentioning_iteration_rejected() {
        let ctx = PromptContext::new("Explain tides", WorkflowMode::ResearchAssembly);
        let mut pair = SectionedPromptCompiler::new()
            .compile(&Decision::Initial, &LoopState::new(3), &ctx)
            .unwrap();
        assert!(PromptValidator::new().validate(&pair).is_ok());
        pair.system.push_str("\nThis is iteration 1.");
        assert!(PromptValidator::new().validate(&pair).is_err());
    }
}
