//! 信号账本：记录「某 Approach 在某类任务上最近成功」的衰减信号
//!
//! - 信号在任务完成时写入，之后不再修改；读取时按年龄做指数半衰期衰减：
//!   strength * exp(-ln2 * age / decay_rate)
//! - 超过 expiry_half_lives 个半衰期的信号视为过期，在读取时惰性清理
//! - 衰减后低于 NEGLIGIBLE_STRENGTH 的信号不出现在结果里

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CoordinationSection;
use crate::discovery::{cosine_similarity, FeatureVector};
use crate::registry::ranking::half_life_factor;
use crate::store::KeyValueStore;

/// 衰减后低于该值视为 0
pub const NEGLIGIBLE_STRENGTH: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub task_id: String,
    pub approach_id: String,
    /// 产生信号的任务特征，路由时用于匹配相似任务
    pub features: FeatureVector,
    /// 记录时的强度，>= 0
    pub strength: f64,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_milliseconds() as f64 / 1000.0).max(0.0)
    }
}

/// 带当前衰减强度的信号
#[derive(Debug, Clone)]
pub struct DecayedSignal {
    pub signal: Signal,
    pub strength: f64,
}

/// strength * 2^(-age / decay_rate)
pub fn decayed_strength(strength: f64, age_secs: f64, decay_rate_secs: f64) -> f64 {
    strength.max(0.0) * half_life_factor(age_secs, decay_rate_secs)
}

pub struct SignalLedger {
    store: Arc<dyn KeyValueStore<Signal>>,
    decay_rate_secs: f64,
    expiry_half_lives: f64,
}

impl SignalLedger {
    pub fn new(store: Arc<dyn KeyValueStore<Signal>>, settings: &CoordinationSection) -> Self {
        Self {
            store,
            decay_rate_secs: settings.decay_rate_secs,
            expiry_half_lives: settings.expiry_half_lives,
        }
    }

    pub fn decay_rate_secs(&self) -> f64 {
        self.decay_rate_secs
    }

    pub fn record(
        &self,
        task_id: &str,
        approach_id: &str,
        features: FeatureVector,
        strength: f64,
    ) -> Signal {
        self.record_at(task_id, approach_id, features, strength, Utc::now())
    }

    /// 追加一条信号；负值与非有限值按 0 记录
    pub fn record_at(
        &self,
        task_id: &str,
        approach_id: &str,
        features: FeatureVector,
        strength: f64,
        now: DateTime<Utc>,
    ) -> Signal {
        let strength = if strength.is_finite() { strength.max(0.0) } else { 0.0 };
        let signal = Signal {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            approach_id: approach_id.to_string(),
            features,
            strength,
            created_at: now,
        };
        self.store.put(&signal.id, signal.clone());
        tracing::debug!(task = %task_id, approach = %approach_id, strength, "signal recorded");
        signal
    }

    pub fn decayed_strength(&self, signal: &Signal, now: DateTime<Utc>) -> f64 {
        decayed_strength(signal.strength, signal.age_secs(now), self.decay_rate_secs)
    }

    fn is_expired(&self, signal: &Signal, now: DateTime<Utc>) -> bool {
        signal.age_secs(now) > self.expiry_half_lives * self.decay_rate_secs
    }

    /// 未过期、衰减后仍非零的信号；顺带删除过期条目
    fn live(&self, now: DateTime<Utc>) -> Vec<DecayedSignal> {
        let mut live = Vec::new();
        for (key, signal) in self.store.scan_all() {
            if self.is_expired(&signal, now) {
                self.store.remove(&key);
                continue;
            }
            let strength = self.decayed_strength(&signal, now);
            if strength >= NEGLIGIBLE_STRENGTH {
                live.push(DecayedSignal { signal, strength });
            }
        }
        live
    }

    /// 最新优先的衰减信号；max_age_secs 为 None 时只受过期规则限制
    pub fn recent_signals(
        &self,
        limit: usize,
        max_age_secs: Option<f64>,
        now: DateTime<Utc>,
    ) -> Vec<DecayedSignal> {
        let mut signals: Vec<DecayedSignal> = self
            .live(now)
            .into_iter()
            .filter(|d| max_age_secs.map_or(true, |max| d.signal.age_secs(now) <= max))
            .collect();
        signals.sort_by(|a, b| {
            b.signal
                .created_at
                .cmp(&a.signal.created_at)
                .then_with(|| a.signal.id.cmp(&b.signal.id))
        });
        signals.truncate(limit);
        signals
    }

    /// 与给定任务特征相似（余弦 >= vigilance）的信号，按 Approach 汇总衰减强度
    pub fn strength_by_approach(
        &self,
        features: &FeatureVector,
        vigilance: f64,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for d in self.live(now) {
            if cosine_similarity(&d.signal.features, features) >= vigilance {
                *totals.entry(d.signal.approach_id).or_insert(0.0) += d.strength;
            }
        }
        totals
    }

    pub fn count_active(&self, now: DateTime<Utc>) -> usize {
        self.live(now).len()
    }

    /// 存储中的条目数（含尚未清理的过期信号）
    pub fn stored(&self) -> usize {
        self.store.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::Duration;

    fn ledger() -> SignalLedger {
        SignalLedger::new(InMemoryStore::shared(), &CoordinationSection::default())
    }

    fn features(name: &str) -> FeatureVector {
        let mut f = FeatureVector::new();
        f.insert(name.to_string(), 1.0);
        f
    }

    #[test]
    fn test_decay_halves_at_decay_rate() {
        assert_eq!(decayed_strength(0.8, 0.0, 1800.0), 0.8);
        assert!((decayed_strength(0.8, 1800.0, 1800.0) - 0.4).abs() < 1e-12);
        let mut prev = f64::MAX;
        for age in [0.0, 10.0, 100.0, 1000.0, 5000.0] {
            let s = decayed_strength(1.0, age, 1800.0);
            assert!(s >= 0.0 && s < prev);
            prev = s;
        }
    }

    #[test]
    fn test_negative_strength_clamped() {
        let ledger = ledger();
        let s = ledger.record("t", "a", FeatureVector::new(), -3.0);
        assert_eq!(s.strength, 0.0);
    }

    #[test]
    fn test_recent_signals_newest_first_and_decayed() {
        let ledger = ledger();
        let now = Utc::now();
        ledger.record_at("t1", "a", features("x"), 1.0, now - Duration::seconds(1800));
        ledger.record_at("t2", "b", features("x"), 1.0, now - Duration::seconds(60));
        ledger.record_at("t3", "c", features("x"), 1.0, now);

        let recent = ledger.recent_signals(10, None, now);
        let tasks: Vec<&str> = recent.iter().map(|d| d.signal.task_id.as_str()).collect();
        assert_eq!(tasks, vec!["t3", "t2", "t1"]);
        assert!((recent[2].strength - 0.5).abs() < 1e-9);

        assert_eq!(ledger.recent_signals(2, None, now).len(), 2);
        assert_eq!(ledger.recent_signals(10, Some(120.0), now).len(), 2);
    }

    #[test]
    fn test_expired_and_negligible_signals_excluded() {
        let ledger = ledger();
        let now = Utc::now();
        ledger.record_at("old", "a", features("x"), 1.0, now - Duration::hours(10));
        ledger.record_at("zero", "a", features("x"), 0.0, now);
        ledger.record_at("fresh", "a", features("x"), 0.9, now);

        assert_eq!(ledger.count_active(now), 1);
        // 过期条目在读取时被删除
        assert_eq!(ledger.stored(), 2);
    }

    #[test]
    fn test_strength_by_approach_respects_vigilance() {
        let ledger = ledger();
        let now = Utc::now();
        ledger.record_at("t1", "a", features("domain:code"), 0.6, now);
        ledger.record_at("t2", "a", features("domain:code"), 0.3, now);
        ledger.record_at("t3", "b", features("domain:chat"), 0.9, now);

        let totals = ledger.strength_by_approach(&features("domain:code"), 0.75, now);
        assert!((totals["a"] - 0.9).abs() < 1e-12);
        assert!(!totals.contains_key("b"));
    }
}
