//! 协调引擎：把路由、ADDM 循环、注册表、信号账本与模式发现串成一次完整的任务处理
//!
//! 数据流：任务画像 → 路由选 Approach（无可用时注册种子集合）与 Specialist → ADDM 循环
//! → 成功结束后更新两个注册表、写入信号与执行记录 → 每累计 discovery.interval 条记录自动运行一次发现。
//! 循环失败或被取消时不写任何共享状态。
//!
//! 引擎只持有 Arc 与按键原子更新的存储，生成调用期间不持有任何锁，可在多个任务间并发使用。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::addm::{
    AddmLoop, DecisionPolicy, DecisionRegulator, HeuristicScorer, LoopOutcome, LoopSession,
    QualityScorer,
};
use crate::config::{AppConfig, DiscoverySection, WorkflowMode};
use crate::core::{CoordinationError, LoopFailure};
use crate::discovery::{DiscoveryOutcome, ExecutionHistory, ExecutionRecord, PatternDiscoveryEngine};
use crate::ledger::SignalLedger;
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::prompt::PromptContext;
use crate::registry::{
    seed_approaches, ApproachRegistry, RegistryStats, SpecialistRegistry, StatusCounts,
};
use crate::router::{ApproachSelection, CoordinationRouter, RouteDecision, Task, TaskProfiler};
use crate::store::InMemoryStore;

/// 没有显式命名时单一后端的 specialist id
pub const DEFAULT_SPECIALIST: &str = "default";

/// 快照里每个注册表列出的前几名
const SNAPSHOT_TOP_K: usize = 5;

/// 根据配置与环境变量选择生成后端：有 API Key 用 OpenAI 兼容端点，否则用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let has_key = cfg.llm.api_key.is_some() || std::env::var("OPENROUTER_API_KEY").is_ok();
    if has_key {
        tracing::info!(provider = %cfg.llm.provider, model = %cfg.llm.model, "using OpenAI-compatible backend");
        Arc::new(OpenAiClient::from_config(&cfg.llm))
    } else {
        tracing::warn!("no API key set, using mock backend");
        Arc::new(MockLlmClient)
    }
}

/// 一次任务处理的结果
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task: Task,
    pub approach_id: String,
    pub specialist_id: String,
    /// 路由得分明细；注册种子集合后的首次选择同样有值
    pub selection: Option<ApproachSelection>,
    /// 本次是否触发了种子集合注册
    pub bootstrapped: bool,
    pub outcome: LoopOutcome,
    pub success: bool,
    /// 本次任务触发的自动发现新注册的 Approach
    pub discovered: Vec<String>,
}

impl TaskReport {
    pub fn final_content(&self) -> &str {
        &self.outcome.final_content
    }

    pub fn quality(&self) -> f64 {
        self.outcome.final_quality
    }
}

/// 一次发现运行：发现结果 + 实际新注册的 id（已存在的候选不覆盖）
#[derive(Debug, Clone)]
pub struct DiscoveryRun {
    pub outcome: DiscoveryOutcome,
    pub registered: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformerSummary {
    pub id: String,
    pub score: f64,
    pub average_quality: f64,
    pub executions: u64,
}

/// 引擎状态快照（供仪表盘 / 状态查询）
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub approach_counts: StatusCounts,
    pub approach_stats: RegistryStats,
    pub specialist_stats: RegistryStats,
    pub top_approaches: Vec<PerformerSummary>,
    pub top_specialists: Vec<PerformerSummary>,
    pub active_signals: usize,
    pub executions: usize,
    pub discovery: DiscoverySection,
}

pub struct CoordinationEngine {
    config: AppConfig,
    specialists: BTreeMap<String, Arc<dyn LlmClient>>,
    approaches: Arc<ApproachRegistry>,
    specialist_registry: Arc<SpecialistRegistry>,
    ledger: Arc<SignalLedger>,
    history: ExecutionHistory,
    discovery: PatternDiscoveryEngine,
    router: CoordinationRouter,
    policy: Arc<dyn DecisionPolicy>,
    scorer: Arc<dyn QualityScorer>,
}

impl CoordinationEngine {
    /// 校验配置并用内存存储构建全部组件；至少需要一个 specialist
    pub fn new(
        config: AppConfig,
        specialists: Vec<(String, Arc<dyn LlmClient>)>,
    ) -> Result<Self, CoordinationError> {
        config.validate()?;
        if specialists.is_empty() {
            return Err(CoordinationError::Configuration(
                "at least one specialist backend is required".to_string(),
            ));
        }
        let specialists: BTreeMap<String, Arc<dyn LlmClient>> = specialists.into_iter().collect();

        let approaches = Arc::new(ApproachRegistry::new(
            InMemoryStore::shared(),
            config.registry.clone(),
        ));
        let specialist_registry = Arc::new(SpecialistRegistry::new(
            InMemoryStore::shared(),
            config.registry.clone(),
            config.coordination.learning_rate,
        ));
        for id in specialists.keys() {
            specialist_registry.ensure(id);
        }
        let ledger = Arc::new(SignalLedger::new(
            InMemoryStore::shared(),
            &config.coordination,
        ));
        let router = CoordinationRouter::new(
            approaches.clone(),
            specialist_registry.clone(),
            ledger.clone(),
            &config,
        );

        tracing::info!(
            specialists = specialists.len(),
            max_iterations = config.addm.max_iterations,
            workflow_mode = ?config.addm.workflow_mode,
            "coordination engine ready"
        );
        Ok(Self {
            history: ExecutionHistory::new(InMemoryStore::shared()),
            discovery: PatternDiscoveryEngine::new(config.discovery),
            policy: Arc::new(DecisionRegulator::new(&config.addm)),
            scorer: Arc::new(HeuristicScorer),
            specialists,
            approaches,
            specialist_registry,
            ledger,
            router,
            config,
        })
    }

    /// 单一后端，id 为 DEFAULT_SPECIALIST
    pub fn with_client(config: AppConfig, client: Arc<dyn LlmClient>) -> Result<Self, CoordinationError> {
        Self::new(config, vec![(DEFAULT_SPECIALIST.to_string(), client)])
    }

    pub fn with_policy(mut self, policy: Arc<dyn DecisionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn approaches(&self) -> &ApproachRegistry {
        &self.approaches
    }

    pub fn specialists(&self) -> &SpecialistRegistry {
        &self.specialist_registry
    }

    pub fn ledger(&self) -> &SignalLedger {
        &self.ledger
    }

    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// 按配置中的工作流模式处理一个任务
    pub async fn run_task(
        &self,
        prompt: &str,
        session: LoopSession<'_>,
    ) -> Result<TaskReport, LoopFailure> {
        self.run_task_in_mode(prompt, self.config.addm.workflow_mode, session)
            .await
    }

    pub async fn run_task_in_mode(
        &self,
        prompt: &str,
        mode: WorkflowMode,
        session: LoopSession<'_>,
    ) -> Result<TaskReport, LoopFailure> {
        let task = TaskProfiler::profile(prompt, mode);
        let now = Utc::now();

        let (selection, bootstrapped) = match self.router.select_approach(&task, now) {
            RouteDecision::Selected(s) => (s, false),
            RouteDecision::Bootstrap => {
                let seeded = self.seed();
                tracing::info!(task = %task.id, seeded, "bootstrap: seed approaches registered");
                match self.router.select_approach(&task, now) {
                    RouteDecision::Selected(s) => (s, true),
                    RouteDecision::Bootstrap => {
                        return Err(self.setup_failure(
                            "no active approach available after seeding",
                        ))
                    }
                }
            }
        };
        let approach = self.approaches.get(&selection.approach_id);

        let available: Vec<String> = self.specialists.keys().cloned().collect();
        let Some(specialist) = self.router.select_specialist(&available, now) else {
            return Err(self.setup_failure("no specialist available"));
        };
        let Some(client) = self.specialists.get(&specialist.specialist_id).cloned() else {
            return Err(self.setup_failure("selected specialist has no backend"));
        };

        let addm = AddmLoop::new(client, self.config.addm.clone())
            .with_policy(self.policy.clone())
            .with_scorer(self.scorer.clone());
        let mut ctx = PromptContext::new(&task.prompt, mode);
        if let Some(a) = approach.as_ref() {
            ctx = ctx.with_approach(a);
        }

        tracing::info!(
            task = %task.id,
            domain = %task.domain,
            approach = %selection.approach_id,
            specialist = %specialist.specialist_id,
            "task started"
        );
        let outcome = match addm.run(ctx, session).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                tracing::warn!(
                    task = %task.id,
                    error = %failure.source,
                    sections = failure.state.sections.len(),
                    "task failed, registries left untouched"
                );
                return Err(failure);
            }
        };

        let quality = outcome.final_quality;
        let success = quality >= self.config.coordination.success_threshold;
        let done = Utc::now();
        self.approaches
            .record_outcome_at(&selection.approach_id, quality, success, done);
        self.specialist_registry.record_outcome_at(
            &specialist.specialist_id,
            Some(&task.domain),
            quality,
            success,
            done,
        );
        self.ledger.record_at(
            &task.id,
            &selection.approach_id,
            task.features.clone(),
            quality,
            done,
        );
        let executions = self.history.append(ExecutionRecord {
            task_id: task.id.clone(),
            approach_id: selection.approach_id.clone(),
            specialist_id: specialist.specialist_id.clone(),
            features: task.features.clone(),
            quality,
            timestamp: done,
        });

        let interval = self.discovery.settings().interval;
        let discovered = if interval > 0 && executions % interval == 0 {
            self.discover_now().registered
        } else {
            Vec::new()
        };

        tracing::info!(
            task = %task.id,
            quality,
            success,
            iterations = outcome.iterations(),
            "task finished"
        );
        Ok(TaskReport {
            approach_id: selection.approach_id.clone(),
            specialist_id: specialist.specialist_id,
            selection: Some(selection),
            bootstrapped,
            outcome,
            success,
            discovered,
            task,
        })
    }

    /// 注册种子 Approach，返回新注册的数量
    pub fn seed(&self) -> usize {
        seed_approaches()
            .into_iter()
            .filter(|a| self.approaches.register(a.clone()))
            .count()
    }

    /// 立即对全部执行历史运行一次发现，并注册尚不存在的候选
    pub fn discover_now(&self) -> DiscoveryRun {
        let outcome = self.discovery.discover(&self.history.all());
        let registered: Vec<String> = outcome
            .candidates()
            .iter()
            .cloned()
            .filter_map(|c| {
                let id = c.id.clone();
                self.approaches.register(c.into_approach()).then_some(id)
            })
            .collect();
        if !registered.is_empty() {
            tracing::info!(count = registered.len(), ids = ?registered, "discovered approaches registered");
        }
        DiscoveryRun { outcome, registered }
    }

    /// 运行时调整 min_quality / min_cluster_size / similarity_threshold 等，不需要重建引擎
    pub fn update_discovery_settings(&self, settings: DiscoverySection) -> Result<(), CoordinationError> {
        let mut next = self.config.clone();
        next.discovery = settings;
        next.validate()?;
        self.discovery.update_settings(settings);
        Ok(())
    }

    pub fn discovery_settings(&self) -> DiscoverySection {
        self.discovery.settings()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let now = Utc::now();
        let top_approaches = self
            .approaches
            .top_performers(SNAPSHOT_TOP_K, now)
            .into_iter()
            .map(|r| PerformerSummary {
                score: r.score,
                average_quality: r.entry.metrics.avg_quality,
                executions: r.entry.metrics.usage_count,
                id: r.entry.id,
            })
            .collect();
        let top_specialists = self
            .specialist_registry
            .top_performers(SNAPSHOT_TOP_K, now)
            .into_iter()
            .map(|r| PerformerSummary {
                score: r.score,
                average_quality: r.entry.average_quality,
                executions: r.entry.total_executions,
                id: r.entry.id,
            })
            .collect();
        EngineSnapshot {
            taken_at: now,
            approach_counts: self.approaches.count_by_status(),
            approach_stats: self.approaches.stats(),
            specialist_stats: self.specialist_registry.stats(),
            top_approaches,
            top_specialists,
            active_signals: self.ledger.count_active(now),
            executions: self.history.len(),
            discovery: self.discovery.settings(),
        }
    }

    fn setup_failure(&self, reason: &str) -> LoopFailure {
        tracing::warn!(%reason, "task could not start");
        LoopFailure::new(
            CoordinationError::Configuration(reason.to_string()),
            crate::addm::LoopState::new(self.config.addm.max_iterations),
        )
    }
}
