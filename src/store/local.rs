use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, error};

use super::{Item, Store};
use crate::context::Context;
use crate::error::StoreError;

/// 以一个平铺目录作为存储，条目编号取 inode 号。
///
/// 写入直接覆盖原文件（先截断再写），中途失败（例如 ENOSPC）会留下不完整的内容。
/// 临时文件加 rename 会换掉 inode，从而改变条目编号，所以这里不做原子替换。
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { base_path: root }
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(self.base_path.join(name))
    }
}

fn map_io(name: &str, e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(name.to_string())
    } else {
        StoreError::Io(e)
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn list<'a>(&'a self, _ctx: &'a Context) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // 忽略 macOS 的元数据文件
            if name.starts_with("._") {
                debug!("Ignoring macOS metadata file in list: {}", name);
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                // 列目录与读取之间被删除
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }
            let data = match tokio::fs::read(entry.path()).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            items.push(Item {
                id: metadata.ino(),
                name,
                data,
            });
        }
        Ok(items)
    }

    async fn lookup<'a>(&'a self, _ctx: &'a Context, name: &'a str) -> Result<Item, StoreError> {
        let full_path = self.entry_path(name)?;
        let metadata = tokio::fs::metadata(&full_path)
            .await
            .map_err(|e| map_io(name, e))?;
        if !metadata.is_file() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let data = tokio::fs::read(&full_path)
            .await
            .map_err(|e| map_io(name, e))?;
        Ok(Item {
            id: metadata.ino(),
            name: name.to_string(),
            data,
        })
    }

    async fn write<'a>(
        &'a self,
        _ctx: &'a Context,
        name: &'a str,
        data: &'a [u8],
    ) -> Result<(), StoreError> {
        let full_path = self.entry_path(name)?;
        let metadata = tokio::fs::metadata(&full_path)
            .await
            .map_err(|e| map_io(name, e))?;
        if !metadata.is_file() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        debug!("write: writing to {:?}, size={}", full_path, data.len());
        tokio::fs::write(&full_path, data).await.map_err(|e| {
            error!("write: failed to write file: {:?}", e);
            map_io(name, e)
        })
    }
}
