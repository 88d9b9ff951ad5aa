//! 模式发现引擎：对执行历史聚类，产出新的 Approach 候选
//!
//! 阈值（min_quality / min_cluster_size / similarity_threshold / readiness_threshold）保存在
//! RwLock 里，运行期可通过 update_settings 调整，下一次 discover 即生效。

use std::sync::RwLock;

use serde::Serialize;

use crate::config::DiscoverySection;
use crate::discovery::cluster::{cluster_by_similarity, dominant_features, Cluster, FeatureVector};
use crate::discovery::history::ExecutionRecord;
use crate::registry::{Approach, ApproachOrigin, StyleMetadata};

/// 命名与风格推导时取质心的前几个主导特征
const DOMINANT_FEATURES: usize = 3;

/// 由一个簇提出的 Approach 候选
#[derive(Debug, Clone, Serialize)]
pub struct ApproachCandidate {
    pub id: String,
    pub name: String,
    pub style: StyleMetadata,
    pub centroid: FeatureVector,
    pub dominant_features: Vec<String>,
    pub cluster_size: usize,
    pub mean_quality: f64,
    /// 簇成员中出现最多的来源 Approach
    pub source_approach: Option<String>,
}

impl ApproachCandidate {
    fn from_cluster(cluster: &Cluster<ExecutionRecord>, mean_quality: f64) -> Self {
        let dominant = dominant_features(&cluster.centroid, DOMINANT_FEATURES);
        let slug = if dominant.is_empty() {
            "general".to_string()
        } else {
            dominant.join("+")
        };
        Self {
            id: format!("discovered:{slug}"),
            name: format!("Discovered pattern ({})", dominant.join(", ")),
            style: StyleMetadata::from_dominant_features(&dominant),
            centroid: cluster.centroid.clone(),
            dominant_features: dominant,
            cluster_size: cluster.len(),
            mean_quality,
            source_approach: most_common_approach(&cluster.members),
        }
    }

    pub fn into_approach(self) -> Approach {
        Approach::new(self.id, self.name)
            .with_style(self.style)
            .with_origin(ApproachOrigin::Discovered)
            .with_quality_prior(self.mean_quality)
    }
}

fn most_common_approach(records: &[ExecutionRecord]) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for r in records {
        let id = r.approach_id.as_str();
        match counts.iter().position(|(seen, _)| *seen == id) {
            Some(idx) => counts[idx].1 += 1,
            None => counts.push((id, 1)),
        }
    }
    // max_by_key 同值取最后一个，这里要第一个出现的
    let mut best: Option<(&str, usize)> = None;
    for (id, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((id, n));
        }
    }
    best.map(|(id, _)| id.to_string())
}

/// 一次发现的结果
#[derive(Debug, Clone)]
pub enum DiscoveryOutcome {
    /// 执行记录不足，未运行聚类
    NotReady { have: usize, need: usize },
    /// 满足大小与质量阈值的候选（可能为空）
    Candidates(Vec<ApproachCandidate>),
}

impl DiscoveryOutcome {
    /// NotReady 视为空结果
    pub fn candidates(&self) -> &[ApproachCandidate] {
        match self {
            DiscoveryOutcome::NotReady { .. } => &[],
            DiscoveryOutcome::Candidates(c) => c,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, DiscoveryOutcome::Candidates(_))
    }
}

pub struct PatternDiscoveryEngine {
    settings: RwLock<DiscoverySection>,
}

impl PatternDiscoveryEngine {
    pub fn new(settings: DiscoverySection) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    pub fn settings(&self) -> DiscoverySection {
        *self.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn update_settings(&self, settings: DiscoverySection) {
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
        tracing::info!(
            min_quality = settings.min_quality,
            min_cluster_size = settings.min_cluster_size,
            similarity_threshold = settings.similarity_threshold,
            "discovery settings updated"
        );
    }

    pub fn discover(&self, records: &[ExecutionRecord]) -> DiscoveryOutcome {
        let s = self.settings();
        if records.len() < s.readiness_threshold {
            tracing::debug!(
                have = records.len(),
                need = s.readiness_threshold,
                "discovery not ready"
            );
            return DiscoveryOutcome::NotReady {
                have: records.len(),
                need: s.readiness_threshold,
            };
        }

        let clusters = cluster_by_similarity(
            records,
            |r: &ExecutionRecord| r.features.clone(),
            s.similarity_threshold,
            s.min_cluster_size,
        );
        let cluster_count = clusters.len();
        let candidates: Vec<ApproachCandidate> = clusters
            .iter()
            .filter_map(|cluster| {
                let mean = cluster.members.iter().map(|r| r.quality).sum::<f64>()
                    / cluster.len() as f64;
                (mean >= s.min_quality).then(|| ApproachCandidate::from_cluster(cluster, mean))
            })
            .collect();

        tracing::info!(
            records = records.len(),
            clusters = cluster_count,
            candidates = candidates.len(),
            "pattern discovery finished"
        );
        DiscoveryOutcome::Candidates(candidates)
    }
}
