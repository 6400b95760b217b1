use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::StoreError;

pub mod local;
pub mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

/// 存储中的一个条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// 稳定且唯一，用作节点编号
    pub id: u64,
    /// 唯一键
    pub name: String,
    pub data: Vec<u8>,
}

impl Item {
    pub fn new(id: u64, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            name: name.into(),
            data: data.into(),
        }
    }
}

/// 被适配的键值存储。创建和删除不在此接口内。
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// 当前条目的快照，顺序由存储决定
    async fn list<'a>(&'a self, ctx: &'a Context) -> Result<Vec<Item>, StoreError>;
    async fn lookup<'a>(&'a self, ctx: &'a Context, name: &'a str) -> Result<Item, StoreError>;
    async fn write<'a>(
        &'a self,
        ctx: &'a Context,
        name: &'a str,
        data: &'a [u8],
    ) -> Result<(), StoreError>;
}
