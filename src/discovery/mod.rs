//! 模式发现：执行历史 + 贪心相似度聚类 + 候选 Approach 生成

pub mod cluster;
pub mod engine;
pub mod history;

pub use cluster::{
    assign_clusters, calculate_centroid, cluster_by_similarity, cosine_similarity,
    dominant_features, Cluster, FeatureVector,
};
pub use engine::{ApproachCandidate, DiscoveryOutcome, PatternDiscoveryEngine};
pub use history::{ExecutionHistory, ExecutionRecord};
