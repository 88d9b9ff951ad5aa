//! 键值存储接口：注册表、信号账本、执行历史都建立在它之上
//!
//! 支持 get / put / remove / count / scan_all，以及 update(id, f)：
//! f 是纯函数 `(旧值) -> 新值`，在该键的临界区内执行，避免并发完成时的丢失更新。
//! 当前实现为 InMemoryStore（DashMap 分片锁），后续可接真实存储引擎。

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// 键值存储 trait
pub trait KeyValueStore<V>: Send + Sync {
    fn get(&self, id: &str) -> Option<V>;

    fn put(&self, id: &str, value: V);

    /// 删除并返回旧值；不存在时返回 None
    fn remove(&self, id: &str) -> Option<V>;

    /// 在 id 的临界区内用 f 计算新值并写回，返回新值
    fn update(&self, id: &str, f: &dyn Fn(Option<&V>) -> V) -> V;

    fn count(&self) -> usize;

    /// 全量扫描，按键升序返回
    fn scan_all(&self) -> Vec<(String, V)>;
}

/// 内存实现：DashMap 的 entry 在 f 执行期间持有分片写锁
#[derive(Debug)]
pub struct InMemoryStore<V> {
    entries: DashMap<String, V>,
}

impl<V> InMemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> InMemoryStore<V> {
    /// 便于直接作为 `Arc<dyn KeyValueStore<V>>` 注入
    pub fn shared() -> Arc<dyn KeyValueStore<V>> {
        Arc::new(Self::new())
    }
}

impl<V: Clone + Send + Sync> KeyValueStore<V> for InMemoryStore<V> {
    fn get(&self, id: &str) -> Option<V> {
        self.entries.get(id).map(|v| v.value().clone())
    }

    fn put(&self, id: &str, value: V) {
        self.entries.insert(id.to_string(), value);
    }

    fn remove(&self, id: &str) -> Option<V> {
        self.entries.remove(id).map(|(_, v)| v)
    }

    fn update(&self, id: &str, f: &dyn Fn(Option<&V>) -> V) -> V {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let next = f(Some(occupied.get()));
                occupied.insert(next.clone());
                next
            }
            Entry::Vacant(vacant) => {
                let next = f(None);
                vacant.insert(next.clone());
                next
            }
        }
    }

    fn count(&self) -> usize {
        self.entries.len()
    }

    fn scan_all(&self) -> Vec<(String, V)> {
        let mut all: Vec<(String, V)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
