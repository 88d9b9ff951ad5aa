//! Specialist 注册表：执行单元（模型/Agent 配置）的累计表现
//!
//! specialization_strength 衡量执行历史在任务领域上的集中度（归一化 HHI）：
//! 全部集中在一个领域为 1，均匀分布在多个领域为 0；每次执行后以 learning_rate 向最新集中度靠拢。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RegistrySection;
use crate::registry::ranking::{clamp_quality, composite_score, rank_top, Ranked};
use crate::registry::RegistryStats;
use crate::store::KeyValueStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialist {
    pub id: String,
    pub total_executions: u64,
    pub success_count: u64,
    pub average_quality: f64,
    pub specialization_strength: f64,
    pub last_active_at: Option<DateTime<Utc>>,
    /// 领域 -> 执行次数
    pub domain_counts: BTreeMap<String, u64>,
}

impl Specialist {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            total_executions: 0,
            success_count: 0,
            average_quality: 0.0,
            specialization_strength: 0.0,
            last_active_at: None,
            domain_counts: BTreeMap::new(),
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_executions as f64
        }
    }
}

/// 归一化 HHI：k 个领域、份额 p_i，(Σp_i² - 1/k) / (1 - 1/k)；单领域为 1，无记录为 0
pub fn domain_concentration(domain_counts: &BTreeMap<String, u64>) -> f64 {
    let total: u64 = domain_counts.values().sum();
    let k = domain_counts.values().filter(|c| **c > 0).count();
    match k {
        0 => 0.0,
        1 => 1.0,
        _ => {
            let hhi: f64 = domain_counts
                .values()
                .map(|c| {
                    let p = *c as f64 / total as f64;
                    p * p
                })
                .sum();
            let floor = 1.0 / k as f64;
            ((hhi - floor) / (1.0 - floor)).clamp(0.0, 1.0)
        }
    }
}

pub struct SpecialistRegistry {
    store: Arc<dyn KeyValueStore<Specialist>>,
    settings: RegistrySection,
    learning_rate: f64,
}

impl SpecialistRegistry {
    pub fn new(
        store: Arc<dyn KeyValueStore<Specialist>>,
        settings: RegistrySection,
        learning_rate: f64,
    ) -> Self {
        Self {
            store,
            settings,
            learning_rate,
        }
    }

    pub fn get(&self, id: &str) -> Option<Specialist> {
        self.store.get(id)
    }

    /// 确保条目存在（total_executions = 0）
    pub fn ensure(&self, id: &str) -> Specialist {
        self.store
            .update(id, &|old| old.cloned().unwrap_or_else(|| Specialist::new(id)))
    }

    /// 不带领域信息的结果记录，specialization_strength 保持不变
    pub fn record_outcome(&self, id: &str, quality: f64, success: bool) -> Specialist {
        self.record_outcome_at(id, None, quality, success, Utc::now())
    }

    pub fn record_outcome_at(
        &self,
        id: &str,
        domain: Option<&str>,
        quality: f64,
        success: bool,
        now: DateTime<Utc>,
    ) -> Specialist {
        let quality = clamp_quality(quality);
        let lr = self.learning_rate;
        let updated = self.store.update(id, &|old| {
            let mut s = old.cloned().unwrap_or_else(|| Specialist::new(id));
            let first = s.total_executions == 0;
            s.total_executions += 1;
            if success {
                s.success_count += 1;
            }
            s.average_quality += (quality - s.average_quality) / s.total_executions as f64;
            if let Some(domain) = domain {
                *s.domain_counts.entry(domain.to_string()).or_insert(0) += 1;
                let concentration = domain_concentration(&s.domain_counts);
                s.specialization_strength = if first {
                    concentration
                } else {
                    s.specialization_strength + lr * (concentration - s.specialization_strength)
                };
            }
            s.last_active_at = Some(now);
            s
        });
        tracing::debug!(
            specialist = %id,
            executions = updated.total_executions,
            avg_quality = updated.average_quality,
            specialization = updated.specialization_strength,
            "specialist outcome recorded"
        );
        updated
    }

    pub fn all(&self) -> Vec<Specialist> {
        self.store.scan_all().into_iter().map(|(_, s)| s).collect()
    }

    pub fn count(&self) -> usize {
        self.store.count()
    }

    pub fn top_performers(&self, k: usize, now: DateTime<Utc>) -> Vec<Ranked<Specialist>> {
        let all = self.all();
        let max_usage = all.iter().map(|s| s.total_executions).max().unwrap_or(0);
        let scored = all
            .into_iter()
            .map(|s| {
                let score = composite_score(
                    s.average_quality,
                    s.total_executions,
                    max_usage,
                    s.last_active_at,
                    now,
                    &self.settings,
                );
                (s.id.clone(), s, score)
            })
            .collect();
        rank_top(scored, k)
    }

    pub fn stats(&self) -> RegistryStats {
        let all = self.all();
        let total: u64 = all.iter().map(|s| s.total_executions).sum();
        let weighted: f64 = all
            .iter()
            .map(|s| s.average_quality * s.total_executions as f64)
            .sum();
        RegistryStats {
            entries: all.len(),
            total_executions: total,
            mean_quality: if total == 0 { 0.0 } else { weighted / total as f64 },
        }
    }
}
