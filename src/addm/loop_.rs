//! ADDM 循环驱动：initial → 决策 → research* → enhance / complete
//!
//! 规则：
//! - 每产出一个章节 current_iteration 恰好 +1；enhance 章节产出后立即结束
//! - current_iteration == max_iterations 时无论决策如何都结束
//! - 决策为 research 但只剩最后一个名额，或已没有未请求过的研究方向时，强制改为 enhance
//! - 后端失败不重试，携带已产出章节返回 LoopFailure
//! - 取消只在章节之间生效，已产出章节随 LoopFailure 返回
//!
//! 可选 stream_tx：流式转发正在生成的章节文本；可选 event_tx：推送循环过程事件。

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::addm::decision::{
    Decision, DecisionInput, DecisionKind, DecisionOutcome, DecisionPolicy, RefinementStrategy,
};
use crate::addm::quality::{HeuristicScorer, QualityScorer};
use crate::addm::regulator::DecisionRegulator;
use crate::addm::state::{LoopState, Section, SectionKind};
use crate::config::{AddmSection, WorkflowMode, MAX_ITERATIONS_CEILING};
use crate::core::{CoordinationError, LoopFailure};
use crate::llm::{with_system_prompt, LlmClient, Message};
use crate::prompt::{PromptContext, PromptPair, PromptValidator, SectionedPromptCompiler};

/// 一次 research 最多请求的新方向数
const MAX_FACETS_PER_RESEARCH: usize = 3;

/// 循环过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    IterationUpdate { iteration: usize, max_iterations: usize },
    SectionStarted { kind: SectionKind, label: String },
    /// 正在生成的章节的一小段（流式）
    SectionChunk { text: String },
    SectionDone { kind: SectionKind, label: String, quality: f64 },
    DecisionMade {
        decision: DecisionKind,
        confidence: f64,
        reasoning: String,
    },
    /// 规则覆盖了决策函数的选择
    ForcedTransition {
        from: DecisionKind,
        to: DecisionKind,
        reason: String,
    },
    Compiling,
    Finished { termination: Termination, iterations: usize },
    Error { text: String },
}

/// 循环如何结束
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// 决策为 complete，最后一个章节即结果
    Completed,
    /// 产出了 enhance 综合章节
    Enhanced,
    /// 达到 max_iterations
    Ceiling,
}

/// 单次运行的可选项（取消、流式、事件、结束后编译文档）
pub struct LoopSession<'a> {
    pub cancel_token: CancellationToken,
    pub stream_tx: Option<&'a broadcast::Sender<String>>,
    pub event_tx: Option<&'a mpsc::UnboundedSender<LoopEvent>>,
    /// 没有 enhance 章节且章节多于一个时，结束后再调用一次后端把章节编译成一个文档
    pub compile_document: bool,
}

impl<'a> LoopSession<'a> {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            cancel_token,
            stream_tx: None,
            event_tx: None,
            compile_document: false,
        }
    }

    pub fn with_stream_tx(mut self, tx: &'a broadcast::Sender<String>) -> Self {
        self.stream_tx = Some(tx);
        self
    }

    pub fn with_event_tx(mut self, tx: &'a mpsc::UnboundedSender<LoopEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_compile_document(mut self, enabled: bool) -> Self {
        self.compile_document = enabled;
        self
    }
}

impl Default for LoopSession<'_> {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

fn send_event(tx: &Option<&mpsc::UnboundedSender<LoopEvent>>, ev: LoopEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    pub state: LoopState,
    /// 面向用户的结果：enhance 章节、编译后的文档或最后一个章节
    pub final_content: String,
    pub final_quality: f64,
    pub termination: Termination,
    pub decisions: Vec<DecisionOutcome>,
    pub compiled: bool,
}

impl LoopOutcome {
    pub fn sections(&self) -> &[Section] {
        &self.state.sections
    }

    pub fn iterations(&self) -> usize {
        self.state.current_iteration
    }
}

/// 不同工作流模式下的备用研究方向
fn facet_pool(mode: WorkflowMode) -> &'static [&'static str] {
    match mode {
        WorkflowMode::ResearchAssembly => &[
            "add authoritative sources and citations",
            "include relevant statistics and data",
            "practical applications and examples",
            "limitations and open questions",
            "provide historical context",
        ],
        WorkflowMode::NewsAnalysis => &[
            "explore alternative viewpoints",
            "provide historical context",
            "stakeholder impact",
            "timeline of key events",
            "expert and official reactions",
        ],
    }
}

pub struct AddmLoop {
    client: Arc<dyn LlmClient>,
    policy: Arc<dyn DecisionPolicy>,
    scorer: Arc<dyn QualityScorer>,
    compiler: SectionedPromptCompiler,
    validator: PromptValidator,
    settings: AddmSection,
}

impl AddmLoop {
    pub fn new(client: Arc<dyn LlmClient>, settings: AddmSection) -> Self {
        Self {
            client,
            policy: Arc::new(DecisionRegulator::new(&settings)),
            scorer: Arc::new(HeuristicScorer),
            compiler: SectionedPromptCompiler::new(),
            validator: PromptValidator::new(),
            settings,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn DecisionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.settings.max_iterations = max_iterations;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.settings.max_iterations
    }

    pub async fn run(
        &self,
        ctx: PromptContext<'_>,
        session: LoopSession<'_>,
    ) -> Result<LoopOutcome, LoopFailure> {
        let max = self.settings.max_iterations;
        let mut state = LoopState::new(max);
        if max == 0 || max > MAX_ITERATIONS_CEILING {
            return Err(LoopFailure::new(
                CoordinationError::Configuration(format!(
                    "max_iterations must be within 1..={MAX_ITERATIONS_CEILING}, got {max}"
                )),
                state,
            ));
        }
        let event_tx = session.event_tx;

        let mut decisions: Vec<DecisionOutcome> = Vec::new();
        let mut next = Decision::Initial;
        let mut strategy: Option<RefinementStrategy> = None;

        let termination = loop {
            let Some(kind) = next.section_kind() else {
                break Termination::Completed;
            };
            if session.cancel_token.is_cancelled() {
                send_event(&event_tx, LoopEvent::Error { text: "Cancelled".to_string() });
                tracing::info!(iteration = state.current_iteration, "ADDM loop cancelled");
                return Err(LoopFailure::new(CoordinationError::Cancelled, state));
            }
            send_event(
                &event_tx,
                LoopEvent::IterationUpdate {
                    iteration: state.current_iteration + 1,
                    max_iterations: max,
                },
            );

            let section_ctx = ctx.with_strategy(strategy.as_ref());
            let pair = match self
                .compiler
                .compile(&next, &state, &section_ctx)
                .and_then(|pair| self.validator.validate(&pair).map(|_| pair))
            {
                Ok(pair) => pair,
                Err(e) => return Err(self.fail(e, state, &event_tx)),
            };
            if kind == SectionKind::Research {
                state.mark_requested(&pair.focus_areas);
            }
            state.last_decision = Some(next.clone());

            let label = state.next_label(kind);
            send_event(&event_tx, LoopEvent::SectionStarted { kind, label: label.clone() });
            tracing::info!(
                iteration = state.current_iteration + 1,
                max_iterations = max,
                section = %label,
                "generating section"
            );
            let content = match self.generate(&pair, &session).await {
                Ok(content) => content,
                Err(e) => return Err(self.fail(CoordinationError::Backend(e), state, &event_tx)),
            };
            let quality = self.scorer.score(&content).clamp(0.0, 1.0);
            let pushed = state.push_section(kind, content, quality).map(|_| ());
            if let Err(e) = pushed {
                return Err(self.fail(e, state, &event_tx));
            }
            send_event(&event_tx, LoopEvent::SectionDone { kind, label, quality });

            if kind == SectionKind::Enhance {
                break Termination::Enhanced;
            }
            if state.at_ceiling() {
                tracing::warn!(max_iterations = max, "ADDM loop reached iteration ceiling");
                break Termination::Ceiling;
            }

            let context = state.prior_context();
            let latest = state.last_section().map(|s| s.content.as_str()).unwrap_or("");
            let input = DecisionInput {
                content: latest,
                context: &context,
                workflow_mode: ctx.workflow_mode,
                iteration: state.current_iteration - 1,
                max_iterations: max,
                confidence_threshold: self.settings.confidence_threshold,
                summarization_threshold: self.settings.context_summarization_threshold,
            };
            let outcome = match self.policy.decide(&input) {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.fail(e, state, &event_tx)),
            };
            if outcome.should_summarize {
                tracing::info!(
                    threshold = self.settings.context_summarization_threshold,
                    "accumulated context is long, summarization advised"
                );
            }
            send_event(
                &event_tx,
                LoopEvent::DecisionMade {
                    decision: outcome.decision.kind(),
                    confidence: outcome.confidence,
                    reasoning: outcome.reasoning.clone(),
                },
            );

            let chosen = match self.apply_rules(&outcome.decision, &state, ctx.workflow_mode) {
                Ok(chosen) => chosen,
                Err(e) => return Err(self.fail(e, state, &event_tx)),
            };
            if chosen.kind() != outcome.decision.kind() {
                let reason = if state.current_iteration + 1 >= max {
                    "last iteration is reserved for synthesis"
                } else {
                    "no uncovered research facets remain"
                };
                tracing::warn!(
                    from = outcome.decision.kind().as_str(),
                    to = chosen.kind().as_str(),
                    reason,
                    "forced transition"
                );
                send_event(
                    &event_tx,
                    LoopEvent::ForcedTransition {
                        from: outcome.decision.kind(),
                        to: chosen.kind(),
                        reason: reason.to_string(),
                    },
                );
            }
            strategy = outcome.strategy.clone();
            decisions.push(outcome);
            next = chosen;
        };

        let (final_content, final_quality, compiled) = if session.compile_document
            && termination != Termination::Enhanced
            && state.sections.len() > 1
        {
            if session.cancel_token.is_cancelled() {
                return Err(LoopFailure::new(CoordinationError::Cancelled, state));
            }
            send_event(&event_tx, LoopEvent::Compiling);
            let pair = match self
                .compiler
                .compile_document(&state.sections, &ctx)
                .and_then(|pair| self.validator.validate(&pair).map(|_| pair))
            {
                Ok(pair) => pair,
                Err(e) => return Err(self.fail(e, state, &event_tx)),
            };
            let document = match self.generate(&pair, &session).await {
                Ok(document) => document,
                Err(e) => return Err(self.fail(CoordinationError::Backend(e), state, &event_tx)),
            };
            let quality = self.scorer.score(&document).clamp(0.0, 1.0);
            (document, quality, true)
        } else {
            match state.final_section() {
                Some(s) => (s.content.clone(), s.quality, false),
                None => (String::new(), 0.0, false),
            }
        };

        send_event(
            &event_tx,
            LoopEvent::Finished {
                termination,
                iterations: state.current_iteration,
            },
        );
        tracing::info!(
            iterations = state.current_iteration,
            ?termination,
            final_quality,
            "ADDM loop finished"
        );
        Ok(LoopOutcome {
            state,
            final_content,
            final_quality,
            termination,
            decisions,
            compiled,
        })
    }

    /// 在决策函数的选择上施加上限与 facet 去重规则
    fn apply_rules(
        &self,
        decision: &Decision,
        state: &LoopState,
        mode: WorkflowMode,
    ) -> Result<Decision, CoordinationError> {
        match decision {
            Decision::Initial => Err(CoordinationError::Configuration(
                "initial is only valid as the first decision".to_string(),
            )),
            Decision::Complete => Ok(Decision::Complete),
            Decision::Enhance => Ok(Decision::Enhance),
            Decision::Research { focus_areas } => {
                if state.current_iteration + 1 >= state.max_iterations {
                    return Ok(Decision::Enhance);
                }
                let mut fresh: Vec<String> = Vec::new();
                for area in focus_areas {
                    let area = area.trim();
                    if !area.is_empty()
                        && !state.is_requested(area)
                        && !fresh.iter().any(|f| f.eq_ignore_ascii_case(area))
                    {
                        fresh.push(area.to_string());
                    }
                }
                if fresh.is_empty() {
                    fresh = facet_pool(mode)
                        .iter()
                        .filter(|f| !state.is_requested(f))
                        .take(2)
                        .map(|f| f.to_string())
                        .collect();
                }
                fresh.truncate(MAX_FACETS_PER_RESEARCH);
                if fresh.is_empty() {
                    Ok(Decision::Enhance)
                } else {
                    Ok(Decision::Research { focus_areas: fresh })
                }
            }
        }
    }

    async fn generate(&self, pair: &PromptPair, session: &LoopSession<'_>) -> Result<String, String> {
        let messages = with_system_prompt(&pair.system, &[Message::user(pair.user.clone())]);
        let Some(tx) = session.stream_tx else {
            return self.client.complete(&messages).await;
        };

        let mut stream = self.client.complete_stream(&messages).await?;
        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let _ = tx.send(chunk.clone());
            send_event(&session.event_tx, LoopEvent::SectionChunk { text: chunk.clone() });
            content.push_str(&chunk);
        }
        Ok(content)
    }

    fn fail(
        &self,
        error: CoordinationError,
        state: LoopState,
        event_tx: &Option<&mpsc::UnboundedSender<LoopEvent>>,
    ) -> LoopFailure {
        tracing::warn!(
            iteration = state.current_iteration,
            sections = state.sections.len(),
            error = %error,
            "ADDM loop failed"
        );
        send_event(event_tx, LoopEvent::Error { text: error.to_string() });
        LoopFailure::new(error, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, ScriptedLlmClient};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 总是要求 research，且每次给出新的方向
    struct AlwaysResearch {
        calls: AtomicUsize,
    }

    impl DecisionPolicy for AlwaysResearch {
        fn decide(&self, _input: &DecisionInput<'_>) -> Result<DecisionOutcome, CoordinationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DecisionOutcome::fixed(
                Decision::Research {
                    focus_areas: vec![format!("facet {n}")],
                },
                "keep researching",
            ))
        }
    }

    struct Fixed(Decision);

    impl DecisionPolicy for Fixed {
        fn decide(&self, _input: &DecisionInput<'_>) -> Result<DecisionOutcome, CoordinationError> {
            Ok(DecisionOutcome::fixed(self.0.clone(), "fixed"))
        }
    }

    fn ctx() -> PromptContext<'static> {
        PromptContext::new("Explain ocean tides", WorkflowMode::ResearchAssembly)
    }

    fn looped(client: Arc<dyn LlmClient>, policy: Arc<dyn DecisionPolicy>, max: usize) -> AddmLoop {
        AddmLoop::new(client, AddmSection::default())
            .with_policy(policy)
            .with_max_iterations(max)
    }

    #[tokio::test]
    async fn test_ceiling_stops_endless_research() {
        let policy = Arc::new(AlwaysResearch { calls: AtomicUsize::new(0) });
        let addm = looped(Arc::new(MockLlmClient), policy, 3);
        let outcome = addm.run(ctx(), LoopSession::default()).await.unwrap();
        let kinds: Vec<SectionKind> = outcome.sections().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![SectionKind::Initial, SectionKind::Research, SectionKind::Enhance]
        );
        assert_eq!(outcome.iterations(), 3);
        assert_eq!(outcome.termination, Termination::Enhanced);
        assert!(outcome.final_content.starts_with("## SECTION:ENHANCE"));
    }

    #[tokio::test]
    async fn test_single_iteration_hits_ceiling() {
        let policy = Arc::new(AlwaysResearch { calls: AtomicUsize::new(0) });
        let addm = looped(Arc::new(MockLlmClient), policy, 1);
        let outcome = addm.run(ctx(), LoopSession::default()).await.unwrap();
        assert_eq!(outcome.sections().len(), 1);
        assert_eq!(outcome.termination, Termination::Ceiling);
        assert!(outcome.decisions.is_empty());
    }

    #[tokio::test]
    async fn test_complete_keeps_last_section() {
        let client = Arc::new(ScriptedLlmClient::from_texts(["foundation text"]));
        let addm = looped(client.clone(), Arc::new(Fixed(Decision::Complete)), 5);
        let outcome = addm.run(ctx(), LoopSession::default()).await.unwrap();
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.final_content, "foundation text");
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_partial_sections() {
        let client = Arc::new(ScriptedLlmClient::new(vec![
            Ok("first section".into()),
            Err("503 upstream".into()),
        ]));
        let policy = Arc::new(AlwaysResearch { calls: AtomicUsize::new(0) });
        let addm = looped(client.clone(), policy, 5);
        let failure = addm.run(ctx(), LoopSession::default()).await.unwrap_err();
        assert_eq!(failure.source, CoordinationError::Backend("503 upstream".into()));
        assert_eq!(failure.state.current_iteration, 1);
        assert_eq!(failure.state.sections.len(), 1);
        assert_eq!(failure.state.sections[0].content, "first section");
        assert!(failure.state.error.is_some());
        // 不重试
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_section() {
        let token = CancellationToken::new();
        token.cancel();
        let client = Arc::new(ScriptedLlmClient::from_texts(["never"]));
        let addm = looped(client.clone(), Arc::new(Fixed(Decision::Complete)), 3);
        let failure = addm.run(ctx(), LoopSession::new(token)).await.unwrap_err();
        assert!(failure.is_cancelled());
        assert!(failure.state.sections.is_empty());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_research_facets_never_repeat() {
        // 决策函数反复给同一个方向：第二次起从备用池取新方向
        let policy = Arc::new(Fixed(Decision::Research {
            focus_areas: vec!["provide historical context".into()],
        }));
        let client = Arc::new(ScriptedLlmClient::from_texts(["a", "b", "c", "d", "e"]));
        let addm = looped(client.clone(), policy, 5);
        let outcome = addm.run(ctx(), LoopSession::default()).await.unwrap();
        let facets = &outcome.state.requested_facets;
        let mut deduped = facets.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), facets.len());
        assert_eq!(facets[0], "provide historical context");
        assert_eq!(outcome.sections().len(), 5);
        assert_eq!(outcome.sections()[4].kind, SectionKind::Enhance);

        let requests = client.requests();
        assert!(requests[1][0].content.starts_with("[SECTION:RESEARCH-1]"));
        assert!(requests[2][0].content.starts_with("[SECTION:RESEARCH-2]"));
        // 已请求过的方向列为范围之外
        assert!(requests[2][0].content.contains("Already covered elsewhere"));
    }

    #[tokio::test]
    async fn test_empty_focus_topped_up_from_pool() {
        let policy = Arc::new(Fixed(Decision::Research { focus_areas: vec![] }));
        let addm = looped(Arc::new(MockLlmClient), policy, 4);
        // 空方向会从备用池补齐，不报错
        let outcome = addm.run(ctx(), LoopSession::default()).await.unwrap();
        assert!(outcome.sections().len() <= 4);

        let state = LoopState::new(4);
        let err = SectionedPromptCompiler::new()
            .compile(&Decision::Research { focus_areas: vec![] }, &state, &ctx())
            .unwrap_err();
        assert!(matches!(err, CoordinationError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_streaming_forwards_chunks_and_events() {
        let (stream_tx, mut stream_rx) = broadcast::channel::<String>(256);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let addm = looped(Arc::new(MockLlmClient), Arc::new(Fixed(Decision::Complete)), 3);
        let session = LoopSession::default()
            .with_stream_tx(&stream_tx)
            .with_event_tx(&event_tx);
        let outcome = addm.run(ctx(), session).await.unwrap();

        let mut streamed = String::new();
        while let Ok(chunk) = stream_rx.try_recv() {
            streamed.push_str(&chunk);
        }
        assert_eq!(streamed, outcome.final_content);

        let mut saw_finished = false;
        while let Ok(ev) = event_rx.try_recv() {
            if let LoopEvent::Finished { termination, iterations } = ev {
                assert_eq!(termination, Termination::Completed);
                assert_eq!(iterations, 1);
                saw_finished = true;
            }
        }
        assert!(saw_finished);
    }

    #[tokio::test]
    async fn test_compile_document_after_complete() {
        struct ResearchOnceThenComplete(AtomicUsize);
        impl DecisionPolicy for ResearchOnceThenComplete {
            fn decide(&self, _i: &DecisionInput<'_>) -> Result<DecisionOutcome, CoordinationError> {
                let decision = if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    Decision::Research { focus_areas: vec!["statistics".into()] }
                } else {
                    Decision::Complete
                };
                Ok(DecisionOutcome::fixed(decision, "scripted"))
            }
        }
        let client = Arc::new(ScriptedLlmClient::from_texts(["base", "extra", "compiled doc"]));
        let addm = looped(client.clone(), Arc::new(ResearchOnceThenComplete(AtomicUsize::new(0))), 5);
        let outcome = addm
            .run(ctx(), LoopSession::default().with_compile_document(true))
            .await
            .unwrap();
        assert!(outcome.compiled);
        assert_eq!(outcome.final_content, "compiled doc");
        assert_eq!(outcome.sections().len(), 2);
        assert!(client.requests()[2][0].content.starts_with("[SECTION:COMPILE]"));
    }

    #[tokio::test]
    async fn test_invalid_max_iterations_rejected() {
        let addm = looped(Arc::new(MockLlmClient), Arc::new(Fixed(Decision::Complete)), 0);
        let failure = addm.run(ctx(), LoopSession::default()).await.unwrap_err();
        assert!(matches!(failure.source, CoordinationError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_regulator_driven_run_terminates() {
        let addm = AddmLoop::new(Arc::new(MockLlmClient), AddmSection::default())
            .with_policy(Arc::new(DecisionRegulator::with_seed(&AddmSection::default(), 9)));
        let outcome = addm.run(ctx(), LoopSession::default()).await.unwrap();
        assert!(outcome.iterations() >= 1 && outcome.iterations() <= 5);
        assert_eq!(outcome.sections()[0].kind, SectionKind::Initial);
        assert!(!outcome.final_content.is_empty());
    }
}
