//! 排名与趋势
//!
//! - 综合得分 = quality_weight * 平均质量 + usage_weight * (使用次数 / 最大使用次数) + recency_weight * 新近度
//!   新近度按 recency_half_life 指数衰减：2^(-距上次活跃秒数 / 半衰期)，从未活跃为 0
//! - 趋势：最近 window 个质量的均值与之前 window 个的均值比较，超出 ±band 才判定升降，避免噪声来回跳

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RegistrySection;

/// 近期质量趋势
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityTrend {
    Improving,
    Declining,
    #[default]
    Stable,
}

/// 带综合得分的条目
#[derive(Debug, Clone)]
pub struct Ranked<T> {
    pub entry: T,
    pub score: f64,
}

/// 指数半衰期衰减因子，age <= 0 时为 1
pub fn half_life_factor(age_secs: f64, half_life_secs: f64) -> f64 {
    if half_life_secs <= 0.0 {
        return 0.0;
    }
    (-std::f64::consts::LN_2 * age_secs.max(0.0) / half_life_secs).exp()
}

pub fn recency(last_active: Option<DateTime<Utc>>, now: DateTime<Utc>, half_life_secs: f64) -> f64 {
    match last_active {
        Some(t) => {
            let age = (now - t).num_milliseconds() as f64 / 1000.0;
            half_life_factor(age, half_life_secs)
        }
        None => 0.0,
    }
}

pub fn composite_score(
    avg_quality: f64,
    usage: u64,
    max_usage: u64,
    last_active: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    settings: &RegistrySection,
) -> f64 {
    let usage_share = if max_usage == 0 {
        0.0
    } else {
        usage as f64 / max_usage as f64
    };
    settings.quality_weight * avg_quality
        + settings.usage_weight * usage_share
        + settings.recency_weight * recency(last_active, now, settings.recency_half_life_secs)
}

/// 按得分降序、同分按 id 升序排列并截取前 k 个
pub fn rank_top<T>(entries: Vec<(String, T, f64)>, k: usize) -> Vec<Ranked<T>> {
    let mut scored = entries;
    scored.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
        .into_iter()
        .take(k)
        .map(|(_, entry, score)| Ranked { entry, score })
        .collect()
}

/// 近期 vs 前期均值的带宽判定；样本不足 window + 1 时为 Stable
pub fn classify_trend(qualities: &[f64], window: usize, band: f64) -> QualityTrend {
    if window == 0 || qualities.len() < window + 1 {
        return QualityTrend::Stable;
    }
    let split = qualities.len() - window;
    let recent = &qualities[split..];
    let prior_start = split.saturating_sub(window);
    let prior = &qualities[prior_start..split];
    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let delta = mean(recent) - mean(prior);
    if delta > band {
        QualityTrend::Improving
    } else if delta < -band {
        QualityTrend::Declining
    } else {
        QualityTrend::Stable
    }
}

/// 把质量值规整到 [0, 1]，非有限值视为 0
pub fn clamp_quality(quality: f64) -> f64 {
    if quality.is_finite() {
        quality.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
