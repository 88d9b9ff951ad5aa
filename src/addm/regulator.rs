//! 决策调节器：由内容特征生成三种备选（enhance / research / complete）的证据，再交给 DDM 选择
//!
//! 证据评估：
//! - 基础分 enhance 0.4 / research 0.3 / complete 0.3
//! - 内容 < 200 字符：enhance +0.3、complete -0.2；> 1000 字符：complete +0.2、enhance -0.1
//! - confidence_threshold > 0.9：complete +0.2、enhance -0.1
//! - 章节质量分达到 confidence_threshold：complete +0.2、enhance -0.1
//! - 工作流模式（research_assembly 前 3 轮偏 research，news_analysis 前 2 轮偏 research，之后偏 complete）
//! - 每项截断到 [0, 1]
//! - 接近上限（iteration >= max - 2）：complete 至少 0.8，enhance / research 乘 0.3
//! - 第 0 轮：complete 乘 0.2

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::addm::ddm::MultiAlternativeDdm;
use crate::addm::decision::{
    Decision, DecisionInput, DecisionKind, DecisionOutcome, DecisionPolicy, RefinementStrategy,
};
use crate::addm::quality::QualityMetrics;
use crate::config::{AddmSection, WorkflowMode};
use crate::core::CoordinationError;

/// DDM 备选项顺序
const ALTERNATIVES: [DecisionKind; 3] = [
    DecisionKind::Enhance,
    DecisionKind::Research,
    DecisionKind::Complete,
];

/// 三种备选的证据（即 DDM 漂移率）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evidence {
    pub enhance: f64,
    pub research: f64,
    pub complete: f64,
}

impl Evidence {
    fn clamped(self) -> Self {
        Self {
            enhance: self.enhance.clamp(0.0, 1.0),
            research: self.research.clamp(0.0, 1.0),
            complete: self.complete.clamp(0.0, 1.0),
        }
    }

    fn as_drift_rates(&self) -> [f64; 3] {
        [self.enhance, self.research, self.complete]
    }
}

/// 由内容与模式得到的证据（未做轮次调整）
pub fn assess_evidence(
    metrics: &QualityMetrics,
    mode: WorkflowMode,
    iteration: usize,
    confidence_threshold: f64,
) -> Evidence {
    let mut e = Evidence {
        enhance: 0.4,
        research: 0.3,
        complete: 0.3,
    };

    if metrics.char_count < 200 {
        e.enhance += 0.3;
        e.complete -= 0.2;
    } else if metrics.char_count > 1000 {
        e.complete += 0.2;
        e.enhance -= 0.1;
    }

    if confidence_threshold > 0.9 {
        e.complete += 0.2;
        e.enhance -= 0.1;
    }

    if metrics.score >= confidence_threshold {
        e.complete += 0.2;
        e.enhance -= 0.1;
    }

    match mode {
        WorkflowMode::ResearchAssembly => {
            if iteration < 3 {
                e.research += 0.3;
                e.enhance += 0.2;
                e.complete -= 0.3;
            } else {
                e.research -= 0.1;
                e.enhance -= 0.1;
                e.complete += 0.4;
            }
        }
        WorkflowMode::NewsAnalysis => {
            if iteration < 2 {
                e.research += 0.2;
                e.enhance += 0.2;
                e.complete -= 0.2;
            } else {
                e.research -= 0.2;
                e.enhance -= 0.1;
                e.complete += 0.5;
            }
        }
    }

    e.clamped()
}

/// 轮次调整：接近上限时压向 complete，首轮几乎不 complete
pub fn adjust_for_iteration(mut e: Evidence, iteration: usize, max_iterations: usize) -> Evidence {
    if iteration + 2 >= max_iterations {
        e.complete = e.complete.max(0.8);
        e.enhance *= 0.3;
        e.research *= 0.3;
    }
    if iteration == 0 {
        e.complete *= 0.2;
    }
    e
}

fn reasoning(kind: DecisionKind, confidence: f64, iteration: usize) -> String {
    let body = match kind {
        DecisionKind::Enhance => "Content needs enhancement and refinement. ",
        DecisionKind::Research => "Additional research is required. ",
        _ => "Content quality is sufficient. ",
    };
    format!("Iteration {}: {body}Decision confidence: {confidence:.2}", iteration + 1)
}

pub struct DecisionRegulator {
    ddm: MultiAlternativeDdm,
    rng: Mutex<StdRng>,
}

impl DecisionRegulator {
    pub fn new(cfg: &AddmSection) -> Self {
        Self {
            ddm: MultiAlternativeDdm::from_config(cfg),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// 固定种子，测试与复现用
    pub fn with_seed(cfg: &AddmSection, seed: u64) -> Self {
        Self {
            ddm: MultiAlternativeDdm::from_config(cfg),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl DecisionPolicy for DecisionRegulator {
    fn decide(&self, input: &DecisionInput<'_>) -> Result<DecisionOutcome, CoordinationError> {
        let metrics = QualityMetrics::analyze(input.content);
        let evidence = adjust_for_iteration(
            assess_evidence(
                &metrics,
                input.workflow_mode,
                input.iteration,
                input.confidence_threshold,
            ),
            input.iteration,
            input.max_iterations,
        );

        let result = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            self.ddm.simulate(&evidence.as_drift_rates(), &mut *rng)?
        };
        let kind = ALTERNATIVES[result.chosen];

        let strategy = match kind {
            DecisionKind::Enhance => Some(RefinementStrategy::enhance(&metrics, input.iteration)),
            DecisionKind::Research => Some(RefinementStrategy::research(
                &metrics,
                input.workflow_mode,
                input.iteration,
            )),
            _ => None,
        };
        let decision = match kind {
            DecisionKind::Enhance => Decision::Enhance,
            DecisionKind::Research => Decision::Research {
                focus_areas: strategy
                    .as_ref()
                    .map(|s| s.research_directions.clone())
                    .unwrap_or_default(),
            },
            _ => Decision::Complete,
        };
        let should_summarize = input.context.chars().count() + metrics.char_count
            > input.summarization_threshold;

        tracing::info!(
            iteration = input.iteration,
            decision = kind.as_str(),
            confidence = result.confidence,
            reaction_time_ms = result.reaction_time_ms,
            "ADDM decision"
        );
        tracing::debug!(?evidence, quality = metrics.score, "decision evidence");

        Ok(DecisionOutcome {
            reasoning: reasoning(kind, result.confidence, input.iteration),
            decision,
            confidence: result.confidence,
            reaction_time_ms: result.reaction_time_ms,
            metrics,
            strategy,
            should_summarize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(content: &'a str, iteration: usize, max: usize) -> DecisionInput<'a> {
        DecisionInput {
            content,
            context: "",
            workflow_mode: WorkflowMode::ResearchAssembly,
            iteration,
            max_iterations: max,
            confidence_threshold: 0.85,
            summarization_threshold: 32_000,
        }
    }

    #[test]
    fn test_short_content_early_iteration_evidence() {
        let metrics = QualityMetrics::analyze("too short");
        let e = assess_evidence(&metrics, WorkflowMode::ResearchAssembly, 0, 0.85);
        assert!((e.enhance - 0.9).abs() < 1e-9);
        assert!((e.research - 0.6).abs() < 1e-9);
        assert_eq!(e.complete, 0.0);
    }

    #[test]
    fn test_near_ceiling_forces_complete_evidence() {
        let e = Evidence {
            enhance: 0.9,
            research: 0.6,
            complete: 0.1,
        };
        let adjusted = adjust_for_iteration(e, 3, 5);
        assert_eq!(adjusted.complete, 0.8);
        assert!((adjusted.enhance - 0.27).abs() < 1e-9);
        assert!((adjusted.research - 0.18).abs() < 1e-9);
        let first = adjust_for_iteration(e, 0, 10);
        assert!((first.complete - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_near_ceiling_decides_complete() {
        let regulator = DecisionRegulator::with_seed(&AddmSection::default(), 11);
        let outcome = regulator.decide(&input("too short", 3, 5)).unwrap();
        assert_eq!(outcome.decision, Decision::Complete);
        assert!(outcome.strategy.is_none());
        assert!(outcome.reasoning.starts_with("Iteration 4: Content quality is sufficient."));
        assert!(outcome.reasoning.contains("Decision confidence: "));
    }

    #[test]
    fn test_first_iteration_never_completes_short_content() {
        let regulator = DecisionRegulator::with_seed(&AddmSection::default(), 5);
        for _ in 0..5 {
            let outcome = regulator.decide(&input("too short", 0, 5)).unwrap();
            assert_ne!(outcome.decision, Decision::Complete);
            match &outcome.decision {
                Decision::Research { focus_areas } => assert!(!focus_areas.is_empty()),
                Decision::Enhance => assert!(outcome.strategy.is_some()),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_should_summarize_on_long_context() {
        let regulator = DecisionRegulator::with_seed(&AddmSection::default(), 1);
        let mut inp = input("body", 0, 5);
        inp.summarization_threshold = 10;
        let context = "x".repeat(20);
        inp.context = &context;
        assert!(regulator.decide(&inp).unwrap().should_summarize);
    }
}
