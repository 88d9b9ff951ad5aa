//! 协调路由器：为新任务选择 Approach 与 Specialist
//!
//! Approach 得分 = signal_weight * 相似任务上的衰减信号（求和后截断到 1）
//!              + quality_weight * 平均质量
//!              + recency_weight * 使用新近度（按 registry.recency_half_life_secs 衰减）
//! 从未使用过的活跃 Approach（新种子、新发现的模式）先各试一次，它们之间同样按得分排序；
//! 新发现的 Approach 以簇的平均质量作为质量先验。
//! 同分时优先 usage_count 更少的（探索使用不足的 Approach），再按 id。
//! 注册表里没有活跃 Approach 时返回 RouteDecision::Bootstrap，由调用方回退到种子集合。

pub mod profile;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{AppConfig, RegistrySection, RouterPolicy, RouterSection};
use crate::ledger::SignalLedger;
use crate::registry::ranking::{composite_score, rank_top, recency};
use crate::registry::{ApproachRegistry, Specialist, SpecialistRegistry};

pub use profile::{Task, TaskProfiler};

/// 分差小于该值视为同分
const SCORE_EPSILON: f64 = 1e-9;

/// 把得分量化到 SCORE_EPSILON 的整数倍，排序时按整数比较保证全序
fn score_bucket(score: f64) -> i64 {
    (score / SCORE_EPSILON).round() as i64
}

#[derive(Debug, Clone, Serialize)]
pub struct ApproachSelection {
    pub approach_id: String,
    pub score: f64,
    /// 各分量（未加权）
    pub signal: f64,
    pub quality: f64,
    pub recency: f64,
    pub usage_count: u64,
}

#[derive(Debug, Clone)]
pub enum RouteDecision {
    Selected(ApproachSelection),
    /// 尚无可用 Approach
    Bootstrap,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpecialistSelection {
    pub specialist_id: String,
    pub score: f64,
    pub specialization_strength: f64,
}

pub struct CoordinationRouter {
    approaches: Arc<ApproachRegistry>,
    specialists: Arc<SpecialistRegistry>,
    ledger: Arc<SignalLedger>,
    weights: RouterSection,
    registry: RegistrySection,
    vigilance_threshold: f64,
    max_specialists: usize,
}

impl CoordinationRouter {
    pub fn new(
        approaches: Arc<ApproachRegistry>,
        specialists: Arc<SpecialistRegistry>,
        ledger: Arc<SignalLedger>,
        config: &AppConfig,
    ) -> Self {
        Self {
            approaches,
            specialists,
            ledger,
            weights: config.router.clone(),
            registry: config.registry.clone(),
            vigilance_threshold: config.coordination.vigilance_threshold,
            max_specialists: config.coordination.max_specialists,
        }
    }

    pub fn select_approach(&self, task: &Task, now: DateTime<Utc>) -> RouteDecision {
        let active = self.approaches.active();
        if active.is_empty() {
            tracing::info!(task = %task.id, "no active approaches, bootstrap state");
            return RouteDecision::Bootstrap;
        }

        let signals =
            self.ledger
                .strength_by_approach(&task.features, self.vigilance_threshold, now);
        let w = &self.weights;
        let mut scored: Vec<ApproachSelection> = active
            .into_iter()
            .map(|a| {
                let signal = signals.get(&a.id).copied().unwrap_or(0.0).min(1.0);
                let quality = a.metrics.avg_quality;
                let rec = recency(a.metrics.last_used_at, now, self.registry.recency_half_life_secs);
                ApproachSelection {
                    score: w.signal_weight * signal + w.quality_weight * quality + w.recency_weight * rec,
                    approach_id: a.id,
                    signal,
                    quality,
                    recency: rec,
                    usage_count: a.metrics.usage_count,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            (b.usage_count == 0)
                .cmp(&(a.usage_count == 0))
                .then_with(|| score_bucket(b.score).cmp(&score_bucket(a.score)))
                .then_with(|| a.usage_count.cmp(&b.usage_count))
                .then_with(|| a.approach_id.cmp(&b.approach_id))
        });

        match scored.into_iter().next() {
            Some(best) => {
                tracing::info!(
                    task = %task.id,
                    approach = %best.approach_id,
                    score = best.score,
                    signal = best.signal,
                    quality = best.quality,
                    unused = best.usage_count == 0,
                    "approach selected"
                );
                RouteDecision::Selected(best)
            }
            None => RouteDecision::Bootstrap,
        }
    }

    /// 在可用的 specialist 中选择：先按注册表综合得分取前 max_specialists 个，
    /// 再按路由策略对 specialization_strength 加成
    pub fn select_specialist(
        &self,
        available: &[String],
        now: DateTime<Utc>,
    ) -> Option<SpecialistSelection> {
        let entries: Vec<Specialist> = available
            .iter()
            .map(|id| self.specialists.get(id).unwrap_or_else(|| Specialist::new(id.clone())))
            .collect();
        let max_usage = entries.iter().map(|s| s.total_executions).max().unwrap_or(0);
        let scored = entries
            .into_iter()
            .map(|s| {
                let score = composite_score(
                    s.average_quality,
                    s.total_executions,
                    max_usage,
                    s.last_active_at,
                    now,
                    &self.registry,
                );
                (s.id.clone(), s, score)
            })
            .collect();
        let pool = rank_top(scored, self.max_specialists);

        let bias = self.weights.specialist_bias;
        let mut best: Option<SpecialistSelection> = None;
        for ranked in pool {
            let strength = ranked.entry.specialization_strength;
            let adjust = match self.weights.policy {
                RouterPolicy::Balanced => 0.0,
                RouterPolicy::PreferSpecialists => bias * strength,
                RouterPolicy::PreferGeneralists => bias * (1.0 - strength),
            };
            let candidate = SpecialistSelection {
                specialist_id: ranked.entry.id,
                score: ranked.score + adjust,
                specialization_strength: strength,
            };
            // pool 已按 id 排好同分顺序，严格大于才替换
            if best.as_ref().map_or(true, |b| candidate.score > b.score + SCORE_EPSILON) {
                best = Some(candidate);
            }
        }
        if let Some(ref b) = best {
            tracing::debug!(specialist = %b.specialist_id, score = b.score, "specialist selected");
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowMode;
    use crate::registry::Approach;
    use crate::store::InMemoryStore;

    struct Fixture {
        approaches: Arc<ApproachRegistry>,
        specialists: Arc<SpecialistRegistry>,
        ledger: Arc<SignalLedger>,
        router: CoordinationRouter,
    }

    fn fixture(config: AppConfig) -> Fixture {
        let approaches = Arc::new(ApproachRegistry::new(
            InMemoryStore::shared(),
            config.registry.clone(),
        ));
        let specialists = Arc::new(SpecialistRegistry::new(
            InMemoryStore::shared(),
            config.registry.clone(),
            config.coordination.learning_rate,
        ));
        let ledger = Arc::new(SignalLedger::new(InMemoryStore::shared(), &config.coordination));
        let router = CoordinationRouter::new(
            approaches.clone(),
            specialists.clone(),
            ledger.clone(),
            &config,
        );
        Fixture {
            approaches,
            specialists,
            ledger,
            router,
        }
    }

    fn task() -> Task {
        TaskProfiler::profile("Explain how to debug a Rust borrow error", WorkflowMode::ResearchAssembly)
    }

    #[test]
    fn test_bootstrap_when_registry_empty() {
        let f = fixture(AppConfig::default());
        assert!(matches!(f.router.select_approach(&task(), Utc::now()), RouteDecision::Bootstrap));
    }

    #[test]
    fn test_tie_prefers_less_used_approach() {
        let f = fixture(AppConfig::default());
        let now = Utc::now();
        f.approaches.register(Approach::new("b", "b"));
        f.approaches.register(Approach::new("a", "a"));
        match f.router.select_approach(&task(), now) {
            RouteDecision::Selected(s) => assert_eq!(s.approach_id, "a"),
            RouteDecision::Bootstrap => panic!("expected selection"),
        }
        // 质量为 0 且很久未用：得分仍与 b 持平，但使用次数更多
        f.approaches.record_outcome_at("a", 0.0, false, now - chrono::Duration::days(30));
        match f.router.select_approach(&task(), now) {
            RouteDecision::Selected(s) => {
                assert_eq!(s.approach_id, "b");
                assert_eq!(s.usage_count, 0);
            }
            RouteDecision::Bootstrap => panic!("expected selection"),
        }
    }

    #[test]
    fn test_signal_on_similar_task_wins() {
        let f = fixture(AppConfig::default());
        let now = Utc::now();
        f.approaches.register(Approach::new("plain", "plain"));
        f.approaches.register(Approach::new("boosted", "boosted"));
        let t = task();
        f.ledger.record_at("prev", "boosted", t.features.clone(), 0.9, now);
        // 不相似任务上的信号不计入
        let mut other = t.features.clone();
        other.clear();
        other.insert("domain:news".into(), 1.0);
        f.ledger.record_at("other", "plain", other, 1.0, now);

        match f.router.select_approach(&t, now) {
            RouteDecision::Selected(s) => {
                assert_eq!(s.approach_id, "boosted");
                assert!((s.signal - 0.9).abs() < 1e-9);
            }
            RouteDecision::Bootstrap => panic!("expected selection"),
        }
    }

    #[test]
    fn test_quality_outweighs_missing_signal() {
        let f = fixture(AppConfig::default());
        let now = Utc::now();
        for _ in 0..3 {
            f.approaches.record_outcome_at("strong", 0.95, true, now);
            f.approaches.record_outcome_at("weak", 0.2, false, now);
        }
        match f.router.select_approach(&task(), now) {
            RouteDecision::Selected(s) => assert_eq!(s.approach_id, "strong"),
            RouteDecision::Bootstrap => panic!("expected selection"),
        }
    }

    #[test]
    fn test_unused_approach_explored_before_proven_one() {
        let f = fixture(AppConfig::default());
        let now = Utc::now();
        let t = task();
        for _ in 0..5 {
            f.approaches.record_outcome_at("proven", 0.9, true, now);
        }
        f.ledger.record_at("prev", "proven", t.features.clone(), 1.0, now);
        f.approaches.register(Approach::new("fresh", "fresh").with_quality_prior(0.8));
        match f.router.select_approach(&t, now) {
            RouteDecision::Selected(s) => {
                assert_eq!(s.approach_id, "fresh");
                assert!((s.quality - 0.8).abs() < 1e-9);
            }
            RouteDecision::Bootstrap => panic!("expected selection"),
        }

        // 试过一次后回到按得分比较
        f.approaches.record_outcome_at("fresh", 0.3, false, now);
        match f.router.select_approach(&t, now) {
            RouteDecision::Selected(s) => assert_eq!(s.approach_id, "proven"),
            RouteDecision::Bootstrap => panic!("expected selection"),
        }
    }

    #[test]
    fn test_near_equal_scores_order_deterministically() {
        let f = fixture(AppConfig::default());
        let now = Utc::now();
        // 平均质量只差浮点误差级别，应落入同一档，由使用次数和 id 决定
        let ids = ["c", "a", "d", "b"];
        for (i, id) in ids.iter().enumerate() {
            f.approaches.record_outcome_at(id, 0.6 + i as f64 * 1e-13, true, now);
        }
        f.approaches.record_outcome_at("d", 0.6, true, now);
        for _ in 0..3 {
            match f.router.select_approach(&task(), now) {
                RouteDecision::Selected(s) => {
                    assert_eq!(s.approach_id, "a");
                    assert_eq!(s.usage_count, 1);
                }
                RouteDecision::Bootstrap => panic!("expected selection"),
            }
        }
        assert_eq!(score_bucket(0.5), score_bucket(0.5 + 1e-12));
        assert!(score_bucket(0.5) < score_bucket(0.5 + 1e-8));
    }

    #[test]
    fn test_specialist_policy_bias() {
        let mut config = AppConfig::default();
        config.router.policy = RouterPolicy::PreferSpecialists;
        config.router.specialist_bias = 1.0;
        let f = fixture(config);
        let now = Utc::now();
        for _ in 0..4 {
            f.specialists.record_outcome_at("focused", Some("code"), 0.7, true, now);
        }
        for domain in ["code", "news", "research", "business"] {
            f.specialists.record_outcome_at("broad", Some(domain), 0.7, true, now);
        }
        let available = vec!["broad".to_string(), "focused".to_string()];
        let pick = f.router.select_specialist(&available, now).unwrap();
        assert_eq!(pick.specialist_id, "focused");

        let mut config = AppConfig::default();
        config.router.policy = RouterPolicy::PreferGeneralists;
        config.router.specialist_bias = 1.0;
        let g = fixture(config);
        for _ in 0..4 {
            g.specialists.record_outcome_at("focused", Some("code"), 0.7, true, now);
        }
        for domain in ["code", "news", "research", "business"] {
            g.specialists.record_outcome_at("broad", Some(domain), 0.7, true, now);
        }
        let pick = g.router.select_specialist(&available, now).unwrap();
        assert_eq!(pick.specialist_id, "broad");
    }

    #[test]
    fn test_unknown_specialist_still_selectable() {
        let f = fixture(AppConfig::default());
        let pick = f.router.select_specialist(&["fresh".to_string()], Utc::now()).unwrap();
        assert_eq!(pick.specialist_id, "fresh");
        assert!(f.router.select_specialist(&[], Utc::now()).is_none());
    }
}
