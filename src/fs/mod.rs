// 节点层：唯一的根目录和无状态的文件代理。
// 节点不保存内容，每次操作都回到存储读取。

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{FsError, Result};
use crate::store::Store;

/// 根目录的节点编号，不会与任何条目编号重复
pub const ROOT_ID: u64 = fuser::FUSE_ROOT_ID;
pub const DIR_PERM: u16 = 0o555;
pub const FILE_PERM: u16 = 0o600;
/// 写入和截断允许的最大文件长度
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    pub id: u64,
    pub kind: NodeKind,
    pub perm: u16,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub id: u64,
    pub name: String,
    pub kind: NodeKind,
}

/// 挂载入口，交出根目录
#[derive(Debug, Clone)]
pub struct Root {
    store: Arc<dyn Store>,
    max_file_size: u64,
}

impl Root {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn root(&self) -> DirNode {
        DirNode {
            store: Arc::clone(&self.store),
            max_file_size: self.max_file_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirNode {
    store: Arc<dyn Store>,
    max_file_size: u64,
}

impl DirNode {
    pub fn attributes(&self) -> NodeAttr {
        NodeAttr {
            id: ROOT_ID,
            kind: NodeKind::Directory,
            perm: DIR_PERM,
            size: 0,
        }
    }

    pub async fn lookup(&self, ctx: &Context, name: &str) -> Result<FileNode> {
        let item = ctx
            .run("lookup", name, self.store.lookup(ctx, name))
            .await?;
        debug!("lookup: name={}, id={}", item.name, item.id);
        Ok(self.file(item.id, item.name))
    }

    pub async fn list_entries(&self, ctx: &Context) -> Result<Vec<DirEntry>> {
        let items = ctx.run("list", "", self.store.list(ctx)).await?;
        Ok(items
            .into_iter()
            .map(|item| DirEntry {
                id: item.id,
                name: item.name,
                kind: NodeKind::File,
            })
            .collect())
    }

    /// 按已知编号和名字构造文件节点，不访问存储
    pub fn file(&self, id: u64, name: impl Into<String>) -> FileNode {
        FileNode {
            id,
            name: name.into(),
            store: Arc::clone(&self.store),
            max_file_size: self.max_file_size,
        }
    }
}

/// 单个条目的无状态代理
#[derive(Debug, Clone)]
pub struct FileNode {
    id: u64,
    name: String,
    store: Arc<dyn Store>,
    max_file_size: u64,
}

impl FileNode {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 重新查找并返回一个新的节点，不捕获打开时的内容
    pub async fn open(&self, ctx: &Context) -> Result<FileNode> {
        let item = ctx
            .run("lookup", &self.name, self.store.lookup(ctx, &self.name))
            .await?;
        Ok(FileNode {
            id: item.id,
            name: item.name,
            store: Arc::clone(&self.store),
            max_file_size: self.max_file_size,
        })
    }

    pub async fn attributes(&self, ctx: &Context) -> Result<NodeAttr> {
        let data = self.read_all(ctx).await?;
        Ok(NodeAttr {
            id: self.id,
            kind: NodeKind::File,
            perm: FILE_PERM,
            size: data.len() as u64,
        })
    }

    pub async fn read_all(&self, ctx: &Context) -> Result<Vec<u8>> {
        let item = ctx
            .run("lookup", &self.name, self.store.lookup(ctx, &self.name))
            .await?;
        Ok(item.data)
    }

    /// 读取 `[offset, offset + size)`，超出当前长度时返回 Range 错误
    pub async fn read(&self, ctx: &Context, offset: u64, size: u64) -> Result<Vec<u8>> {
        let mut data = self.read_all(ctx).await?;
        let len = data.len() as u64;
        let end = match offset.checked_add(size) {
            Some(end) if end <= len => end,
            _ => {
                warn!(
                    "read: range {}+{} beyond length {} for name={}",
                    offset, size, len, self.name
                );
                return Err(FsError::Range {
                    name: self.name.clone(),
                    offset,
                    size,
                    len,
                });
            }
        };
        data.truncate(end as usize);
        data.drain(..offset as usize);
        Ok(data)
    }

    /// 没有写缓冲，每次写入都已同步到存储
    pub fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// 把 `data` 拼接到 `offset` 处并写回存储，返回接受的字节数
    pub async fn write(&self, ctx: &Context, offset: u64, data: &[u8]) -> Result<usize> {
        // 空写入不是截断请求
        if data.is_empty() {
            return Ok(0);
        }
        // 先校验长度上限，避免为远超末尾的偏移分配内存
        let end = offset.checked_add(data.len() as u64);
        let offset = self.check_size(end, offset)?;

        let current = self.read_all(ctx).await?;
        let previous_len = current.len();
        let result = splice(current, offset, data);
        debug!(
            "write: name={}, offset={}, size={}, length {} -> {}",
            self.name,
            offset,
            data.len(),
            previous_len,
            result.len()
        );

        ctx.run("write", &self.name, self.store.write(ctx, &self.name, &result))
            .await?;
        Ok(data.len())
    }

    /// 把内容截断或以 0 扩展到 `size`，写回存储后返回新的属性
    pub async fn truncate(&self, ctx: &Context, size: u64) -> Result<NodeAttr> {
        let new_len = self.check_size(Some(size), size)?;
        let mut data = self.read_all(ctx).await?;
        if data.len() != new_len {
            debug!(
                "truncate: name={}, length {} -> {}",
                self.name,
                data.len(),
                new_len
            );
            data.resize(new_len, 0);
            ctx.run("write", &self.name, self.store.write(ctx, &self.name, &data))
                .await?;
        }
        Ok(NodeAttr {
            id: self.id,
            kind: NodeKind::File,
            perm: FILE_PERM,
            size: new_len as u64,
        })
    }

    /// `end` 为结果长度（溢出时为 None），超过上限时返回 TooLarge
    fn check_size(&self, end: Option<u64>, value: u64) -> Result<usize> {
        match end {
            Some(end) if end <= self.max_file_size => usize::try_from(value)
                .map_err(|_| self.too_large(end)),
            _ => {
                let size = end.unwrap_or(u64::MAX);
                warn!(
                    "size {} beyond limit {} for name={}",
                    size, self.max_file_size, self.name
                );
                Err(self.too_large(size))
            }
        }
    }

    fn too_large(&self, size: u64) -> FsError {
        FsError::TooLarge {
            name: self.name.clone(),
            size,
            limit: self.max_file_size,
        }
    }
}

/// 将 `data` 写入 `current` 的 `offset` 处。
///
/// 覆盖到末尾（或更长）时，`offset + data.len()` 之后的原有字节被丢弃；
/// 否则只替换 `[offset, offset + data.len())`，其余保持不变。
/// `offset` 超过当前长度时中间以 0 填充，调用方负责限制 `offset` 的大小。
pub fn splice(mut current: Vec<u8>, offset: usize, data: &[u8]) -> Vec<u8> {
    let tail_len = current.len().saturating_sub(offset);
    if data.len() >= tail_len {
        current.resize(offset, 0);
        current.extend_from_slice(data);
    } else {
        current[offset..offset + data.len()].copy_from_slice(data);
    }
    current
}

/// 协议层的读取窗口：截断到文件末尾，越界时返回空
pub fn clamp_read(data: &[u8], offset: u64, size: u32) -> &[u8] {
    let len = data.len() as u64;
    if offset >= len {
        return &[];
    }
    let end = offset.saturating_add(size as u64).min(len);
    &data[offset as usize..end as usize]
}
