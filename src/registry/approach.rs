//! Approach 注册表：风格/策略模板及其累计表现
//!
//! Approach 来自种子模板、手动注册或模式发现；record_outcome 对未知 id 惰性创建条目。
//! 所有写入都走 KeyValueStore::update，在该 id 的临界区内完成「读旧值 -> 算新值」。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RegistrySection;
use crate::registry::ranking::{
    clamp_quality, classify_trend, composite_score, rank_top, QualityTrend, Ranked,
};
use crate::registry::RegistryStats;
use crate::store::KeyValueStore;

/// 风格元数据：用于构造提示词，字段均可选，未设置时使用下方默认值
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StyleMetadata {
    /// 语气，默认 "clear and neutral"
    pub tone: Option<String>,
    /// 组织结构，默认 "well-organized markdown with headings"
    pub structure: Option<String>,
    /// 深度，默认 "thorough"
    pub depth: Option<String>,
    /// 需要强调的方面（模式发现时取质心的主导特征）
    #[serde(default)]
    pub emphasis: Vec<String>,
    /// 附加的自由说明
    pub instructions: Option<String>,
}

impl StyleMetadata {
    pub const DEFAULT_TONE: &'static str = "clear and neutral";
    pub const DEFAULT_STRUCTURE: &'static str = "well-organized markdown with headings";
    pub const DEFAULT_DEPTH: &'static str = "thorough";

    pub fn tone(&self) -> &str {
        self.tone.as_deref().unwrap_or(Self::DEFAULT_TONE)
    }

    pub fn structure(&self) -> &str {
        self.structure.as_deref().unwrap_or(Self::DEFAULT_STRUCTURE)
    }

    pub fn depth(&self) -> &str {
        self.depth.as_deref().unwrap_or(Self::DEFAULT_DEPTH)
    }

    /// 从 `类别:取值` 形式的主导特征推导风格（tone / structure / depth），其余特征进入 emphasis
    pub fn from_dominant_features(features: &[String]) -> Self {
        let mut style = Self::default();
        for feature in features {
            match feature.split_once(':') {
                Some(("tone", v)) if style.tone.is_none() => style.tone = Some(v.replace('_', " ")),
                Some(("structure", v)) if style.structure.is_none() => {
                    style.structure = Some(v.replace('_', " "))
                }
                Some(("depth", v)) if style.depth.is_none() => style.depth = Some(v.replace('_', " ")),
                _ => style.emphasis.push(feature.clone()),
            }
        }
        style
    }
}

/// 签名要求：产出内容需满足的结构约束，均有默认（不约束）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignatureRequirements {
    /// 最少段落数
    pub min_paragraphs: Option<usize>,
    #[serde(default)]
    pub require_examples: bool,
    #[serde(default)]
    pub require_sources: bool,
    /// 单章节最大字符数
    pub max_chars: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApproachStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApproachOrigin {
    Seed,
    #[default]
    Manual,
    Discovered,
}

/// 累计表现
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// 单调不减
    pub usage_count: u64,
    pub success_count: u64,
    pub avg_quality: f64,
    pub recent_quality_trend: QualityTrend,
    /// 最近 2 * trend_window 个质量值（旧 -> 新）
    pub recent_qualities: Vec<f64>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approach {
    pub id: String,
    pub name: String,
    pub style: StyleMetadata,
    pub signature: SignatureRequirements,
    pub status: ApproachStatus,
    pub origin: ApproachOrigin,
    pub created_at: DateTime<Utc>,
    pub metrics: PerformanceMetrics,
}

impl Approach {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            style: StyleMetadata::default(),
            signature: SignatureRequirements::default(),
            status: ApproachStatus::Active,
            origin: ApproachOrigin::Manual,
            created_at: Utc::now(),
            metrics: PerformanceMetrics::default(),
        }
    }

    pub fn with_style(mut self, style: StyleMetadata) -> Self {
        self.style = style;
        self
    }

    pub fn with_signature(mut self, signature: SignatureRequirements) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_origin(mut self, origin: ApproachOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// 尚未使用时的质量先验；第一次 record_outcome 后被真实质量取代
    pub fn with_quality_prior(mut self, quality: f64) -> Self {
        self.metrics.avg_quality = clamp_quality(quality);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ApproachStatus::Active
    }
}

/// 按状态计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusCounts {
    pub active: usize,
    pub inactive: usize,
}

pub struct ApproachRegistry {
    store: Arc<dyn KeyValueStore<Approach>>,
    settings: RegistrySection,
}

impl ApproachRegistry {
    pub fn new(store: Arc<dyn KeyValueStore<Approach>>, settings: RegistrySection) -> Self {
        Self { store, settings }
    }

    /// 注册（先写者胜）；返回是否为新条目
    pub fn register(&self, approach: Approach) -> bool {
        let inserted = AtomicBool::new(false);
        let id = approach.id.clone();
        self.store.update(&id, &|old| match old {
            Some(existing) => existing.clone(),
            None => {
                inserted.store(true, Ordering::SeqCst);
                approach.clone()
            }
        });
        let inserted = inserted.load(Ordering::SeqCst);
        if inserted {
            tracing::info!(approach = %id, "registered approach");
        }
        inserted
    }

    pub fn get(&self, id: &str) -> Option<Approach> {
        self.store.get(id)
    }

    pub fn record_outcome(&self, id: &str, quality: f64, success: bool) -> Approach {
        self.record_outcome_at(id, quality, success, Utc::now())
    }

    /// 增量均值：avg_new = avg_old + (quality - avg_old) / n
    pub fn record_outcome_at(
        &self,
        id: &str,
        quality: f64,
        success: bool,
        now: DateTime<Utc>,
    ) -> Approach {
        let quality = clamp_quality(quality);
        let window = self.settings.trend_window;
        let band = self.settings.trend_band;
        let updated = self.store.update(id, &|old| {
            let mut a = old
                .cloned()
                .unwrap_or_else(|| Approach::new(id, id));
            let m = &mut a.metrics;
            m.usage_count += 1;
            if success {
                m.success_count += 1;
            }
            m.avg_quality += (quality - m.avg_quality) / m.usage_count as f64;
            m.recent_qualities.push(quality);
            let keep = window * 2;
            if m.recent_qualities.len() > keep {
                let excess = m.recent_qualities.len() - keep;
                m.recent_qualities.drain(..excess);
            }
            m.recent_quality_trend = classify_trend(&m.recent_qualities, window, band);
            m.last_used_at = Some(now);
            a
        });
        tracing::debug!(
            approach = %id,
            usage = updated.metrics.usage_count,
            avg_quality = updated.metrics.avg_quality,
            trend = ?updated.metrics.recent_quality_trend,
            "approach outcome recorded"
        );
        updated
    }

    /// 修改状态；未知 id 返回 None（不创建）
    pub fn set_status(&self, id: &str, status: ApproachStatus) -> Option<Approach> {
        self.store.get(id)?;
        Some(self.store.update(id, &|old| {
            let mut a = old.cloned().unwrap_or_else(|| Approach::new(id, id));
            a.status = status;
            a
        }))
    }

    pub fn all(&self) -> Vec<Approach> {
        self.store.scan_all().into_iter().map(|(_, a)| a).collect()
    }

    pub fn active(&self) -> Vec<Approach> {
        self.all().into_iter().filter(|a| a.is_active()).collect()
    }

    pub fn count(&self) -> usize {
        self.store.count()
    }

    pub fn count_by_status(&self) -> StatusCounts {
        self.all().iter().fold(StatusCounts::default(), |mut acc, a| {
            match a.status {
                ApproachStatus::Active => acc.active += 1,
                ApproachStatus::Inactive => acc.inactive += 1,
            }
            acc
        })
    }

    /// 活跃 Approach 中综合得分最高的 k 个
    pub fn top_performers(&self, k: usize, now: DateTime<Utc>) -> Vec<Ranked<Approach>> {
        let active = self.active();
        let max_usage = active.iter().map(|a| a.metrics.usage_count).max().unwrap_or(0);
        let scored = active
            .into_iter()
            .map(|a| {
                let score = composite_score(
                    a.metrics.avg_quality,
                    a.metrics.usage_count,
                    max_usage,
                    a.metrics.last_used_at,
                    now,
                    &self.settings,
                );
                (a.id.clone(), a, score)
            })
            .collect();
        rank_top(scored, k)
    }

    pub fn stats(&self) -> RegistryStats {
        let all = self.all();
        let total: u64 = all.iter().map(|a| a.metrics.usage_count).sum();
        let weighted: f64 = all
            .iter()
            .map(|a| a.metrics.avg_quality * a.metrics.usage_count as f64)
            .sum();
        RegistryStats {
            entries: all.len(),
            total_executions: total,
            mean_quality: if total == 0 { 0.0 } else { weighted / total as f64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::Duration;

    fn registry() -> ApproachRegistry {
        ApproachRegistry::new(InMemoryStore::shared(), RegistrySection::default())
    }

    #[test]
    fn test_running_mean_equals_arithmetic_mean() {
        let reg = registry();
        let qs = [0.2, 0.9, 0.5, 0.7, 0.1, 1.0, 0.65];
        for q in qs {
            reg.record_outcome("a", q, true);
        }
        let a = reg.get("a").unwrap();
        let mean = qs.iter().sum::<f64>() / qs.len() as f64;
        assert!((a.metrics.avg_quality - mean).abs() < 1e-12);
        assert_eq!(a.metrics.usage_count, qs.len() as u64);
    }

    #[test]
    fn test_unknown_id_created_lazily() {
        let reg = registry();
        assert!(reg.get("fresh").is_none());
        let a = reg.record_outcome("fresh", 0.8, false);
        assert_eq!(a.metrics.usage_count, 1);
        assert_eq!(a.metrics.success_count, 0);
        assert!(a.is_active());
    }

    #[test]
    fn test_register_is_first_write_wins() {
        let reg = registry();
        assert!(reg.register(Approach::new("x", "first")));
        assert!(!reg.register(Approach::new("x", "second")));
        assert_eq!(reg.get("x").unwrap().name, "first");
    }

    #[test]
    fn test_count_by_status() {
        let reg = registry();
        reg.register(Approach::new("a", "a"));
        reg.register(Approach::new("b", "b"));
        reg.register(Approach::new("c", "c"));
        reg.set_status("b", ApproachStatus::Inactive);
        assert!(reg.set_status("missing", ApproachStatus::Inactive).is_none());
        let counts = reg.count_by_status();
        assert_eq!(counts, StatusCounts { active: 2, inactive: 1 });
        assert_eq!(reg.count(), 3);
    }

    #[test]
    fn test_top_performers_prefers_quality_and_skips_inactive() {
        let reg = registry();
        let now = Utc::now();
        for _ in 0..3 {
            reg.record_outcome_at("good", 0.9, true, now);
            reg.record_outcome_at("poor", 0.2, false, now);
            reg.record_outcome_at("off", 1.0, true, now);
        }
        reg.set_status("off", ApproachStatus::Inactive);
        let top = reg.top_performers(5, now + Duration::seconds(1));
        let ids: Vec<&str> = top.iter().map(|r| r.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["good", "poor"]);
        assert!(top[0].score > top[1].score);
    }

    #[test]
    fn test_trend_tracks_recent_window() {
        let reg = registry();
        for q in [0.3, 0.3, 0.3, 0.3, 0.3, 0.9, 0.9, 0.9, 0.9, 0.9] {
            reg.record_outcome("t", q, true);
        }
        let a = reg.get("t").unwrap();
        assert_eq!(a.metrics.recent_quality_trend, QualityTrend::Improving);
        assert_eq!(a.metrics.recent_qualities.len(), 10);
    }

    #[test]
    fn test_style_from_dominant_features() {
        let style = StyleMetadata::from_dominant_features(&[
            "tone:formal".to_string(),
            "domain:code".to_string(),
            "depth:deep_dive".to_string(),
        ]);
        assert_eq!(style.tone(), "formal");
        assert_eq!(style.depth(), "deep dive");
        assert_eq!(style.structure(), StyleMetadata::DEFAULT_STRUCTURE);
        assert_eq!(style.emphasis, vec!["domain:code".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_outcomes_are_not_lost() {
        let reg = Arc::new(registry());
        let mut handles = Vec::new();
        for i in 0..10 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    reg.record_outcome("shared", if i % 2 == 0 { 1.0 } else { 0.0 }, true);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let a = reg.get("shared").unwrap();
        assert_eq!(a.metrics.usage_count, 500);
        assert!((a.metrics.avg_quality - 0.5).abs() < 1e-9);
    }
}
