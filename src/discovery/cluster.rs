//! 贪心单遍相似度聚类
//!
//! 特征向量是「特征名 -> 数值」的有序映射；聚类按输入顺序逐个处理：
//! 条目加入第一个质心余弦相似度 >= 阈值的簇，否则自成新簇；每次加入后重算质心（各坐标均值）。
//! 最后丢弃成员数 < min_cluster_size 的簇，其余按大小降序返回（同大小按发现顺序）。
//!
//! 分配结果依赖输入顺序，这是契约的一部分：同样的输入顺序总得到同样的簇。

use std::collections::BTreeMap;

/// 特征向量：特征名 -> 数值（缺失的特征视为 0）
pub type FeatureVector = BTreeMap<String, f64>;

/// 一个簇：成员、成员特征、质心
#[derive(Debug, Clone)]
pub struct Cluster<T> {
    pub members: Vec<T>,
    pub features: Vec<FeatureVector>,
    pub centroid: FeatureVector,
}

impl<T> Cluster<T> {
    fn seed(item: T, features: FeatureVector) -> Self {
        Self {
            centroid: features.clone(),
            members: vec![item],
            features: vec![features],
        }
    }

    fn push(&mut self, item: T, features: FeatureVector) {
        self.members.push(item);
        self.features.push(features);
        self.centroid = calculate_centroid(&self.features);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// 余弦相似度；任一向量范数为 0 时返回 0
pub fn cosine_similarity(a: &FeatureVector, b: &FeatureVector) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(k, va)| b.get(k).map(|vb| va * vb))
        .sum();
    let norm_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// 各坐标均值；空输入返回空向量
pub fn calculate_centroid(vectors: &[FeatureVector]) -> FeatureVector {
    let mut centroid = FeatureVector::new();
    if vectors.is_empty() {
        return centroid;
    }
    for v in vectors {
        for (k, x) in v {
            *centroid.entry(k.clone()).or_insert(0.0) += x;
        }
    }
    let n = vectors.len() as f64;
    for x in centroid.values_mut() {
        *x /= n;
    }
    centroid
}

/// 质心中数值最大的前 k 个特征（同值按特征名），忽略 <= 0 的特征
pub fn dominant_features(centroid: &FeatureVector, k: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, &f64)> = centroid.iter().filter(|(_, v)| **v > 0.0).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.into_iter().take(k).map(|(name, _)| name.clone()).collect()
}

/// 未过滤的贪心分配：每个输入条目恰好落在一个簇里
pub fn assign_clusters<T, F>(items: &[T], extractor: F, similarity_threshold: f64) -> Vec<Cluster<T>>
where
    T: Clone,
    F: Fn(&T) -> FeatureVector,
{
    let mut clusters: Vec<Cluster<T>> = Vec::new();
    for item in items {
        let features = extractor(item);
        let target = clusters
            .iter()
            .position(|c| cosine_similarity(&c.centroid, &features) >= similarity_threshold);
        match target {
            Some(idx) => clusters[idx].push(item.clone(), features),
            None => clusters.push(Cluster::seed(item.clone(), features)),
        }
    }
    clusters
}

/// 聚类并过滤小簇，按大小降序返回（稳定排序保证同大小时先发现的在前）
pub fn cluster_by_similarity<T, F>(
    items: &[T],
    extractor: F,
    similarity_threshold: f64,
    min_cluster_size: usize,
) -> Vec<Cluster<T>>
where
    T: Clone,
    F: Fn(&T) -> FeatureVector,
{
    let mut clusters: Vec<Cluster<T>> = assign_clusters(items, extractor, similarity_threshold)
        .into_iter()
        .filter(|c| c.len() >= min_cluster_size)
        .collect();
    clusters.sort_by(|a, b| b.len().cmp(&a.len()));
    clusters
}
