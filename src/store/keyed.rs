//! 逐键加锁的状态表
//!
//! 每个 student_id 一把独立的锁：同一学生的并发更新被串行化（后写必须看到前写），
//! 不同学生之间互不竞争。外层 RwLock 只保护注册表本身，拿到 entry 后立即释放。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

pub struct KeyedState<V> {
    inner: RwLock<HashMap<String, Arc<Mutex<V>>>>,
}

impl<V> KeyedState<V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// 取某键的锁柄，不存在时用 init 构造
    pub async fn entry(&self, key: &str, init: impl FnOnce() -> V) -> Arc<Mutex<V>> {
        {
            let map = self.inner.read().await;
            if let Some(cell) = map.get(key) {
                return Arc::clone(cell);
            }
        }

        let mut map = self.inner.write().await;
        // 竞争窗口内可能已被别人插入
        Arc::clone(
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(init()))),
        )
    }

    /// 已有条目的锁柄（只读场景）
    pub async fn get(&self, key: &str) -> Option<Arc<Mutex<V>>> {
        self.inner.read().await.get(key).cloned()
    }
}

impl<V> Default for KeyedState<V> {
    fn default() -> Self {
        Self::new()
    }
}
