use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Item, Store};
use crate::context::Context;
use crate::error::StoreError;
use crate::fs::ROOT_ID;

/// 内存存储，条目编号从根目录编号之后开始分配
#[derive(Debug)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, Item>>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(ROOT_ID + 1),
        }
    }

    pub async fn from_entries<I, N, D>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: Into<Vec<u8>>,
    {
        let store = Self::new();
        for (name, data) in entries {
            store.insert(name, data).await;
        }
        store
    }

    /// 直接写入条目（不经过文件系统），已存在时保留原编号
    pub async fn insert(&self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> u64 {
        let name = name.into();
        let data = data.into();
        let mut items = self.items.write().await;
        if let Some(item) = items.get_mut(&name) {
            item.data = data;
            return item.id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("insert: name={}, id={}, size={}", name, id, data.len());
        items.insert(name.clone(), Item { id, name, data });
        id
    }

    /// 读取当前内容，测试和调试用
    pub async fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.items.read().await.get(name).map(|item| item.data.clone())
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list<'a>(&'a self, _ctx: &'a Context) -> Result<Vec<Item>, StoreError> {
        Ok(self.items.read().await.values().cloned().collect())
    }

    async fn lookup<'a>(&'a self, _ctx: &'a Context, name: &'a str) -> Result<Item, StoreError> {
        self.items
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn write<'a>(
        &'a self,
        _ctx: &'a Context,
        name: &'a str,
        data: &'a [u8],
    ) -> Result<(), StoreError> {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        item.data = data.to_vec();
        debug!("write: name={}, size={}", name, data.len());
        Ok(())
    }
}
