//! 执行历史：只追加的 ExecutionRecord 序列，是模式发现的数据来源
//!
//! 记录以零填充的序号为键写入 KeyValueStore，scan_all 的键序即追加顺序，聚类因此可复现。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::FeatureVector;
use crate::store::KeyValueStore;

/// 一次任务执行的不可变事实
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_id: String,
    pub approach_id: String,
    pub specialist_id: String,
    pub features: FeatureVector,
    pub quality: f64,
    pub timestamp: DateTime<Utc>,
}

/// 只追加的执行历史
pub struct ExecutionHistory {
    store: Arc<dyn KeyValueStore<ExecutionRecord>>,
    next_seq: AtomicU64,
}

impl ExecutionHistory {
    pub fn new(store: Arc<dyn KeyValueStore<ExecutionRecord>>) -> Self {
        let next_seq = AtomicU64::new(store.count() as u64);
        Self { store, next_seq }
    }

    /// 追加一条记录，返回追加后的总数
    pub fn append(&self, record: ExecutionRecord) -> usize {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.store.put(&format!("{seq:016}"), record);
        self.store.count()
    }

    pub fn len(&self) -> usize {
        self.store.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按追加顺序返回全部记录
    pub fn all(&self) -> Vec<ExecutionRecord> {
        self.store.scan_all().into_iter().map(|(_, r)| r).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn record(task: &str) -> ExecutionRecord {
        ExecutionRecord {
            task_id: task.to_string(),
            approach_id: "concise".to_string(),
            specialist_id: "default".to_string(),
            features: FeatureVector::new(),
            quality: 0.7,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_all_preserves_append_order() {
        let history = ExecutionHistory::new(InMemoryStore::shared());
        for i in 0..12 {
            history.append(record(&format!("t{i}")));
        }
        let ids: Vec<String> = history.all().into_iter().map(|r| r.task_id).collect();
        let expected: Vec<String> = (0..12).map(|i| format!("t{i}")).collect();
        assert_eq!(ids, expected);
        assert_eq!(history.len(), 12);
    }

    #[test]
    fn test_resumes_sequence_from_existing_store() {
        let store: Arc<dyn KeyValueStore<ExecutionRecord>> = InMemoryStore::shared();
        ExecutionHistory::new(store.clone()).append(record("first"));
        let reopened = ExecutionHistory::new(store);
        reopened.append(record("second"));
        let ids: Vec<String> = reopened.all().into_iter().map(|r| r.task_id).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
