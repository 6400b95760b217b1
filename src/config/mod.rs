use std::path::Path;
use std::time::Duration;

use fuser::MountOption;
use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};
use crate::fs::DEFAULT_MAX_FILE_SIZE;

/// 挂载配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub fs_name: String,
    pub subtype: String,
    /// 内核缓存属性的时间（毫秒）
    pub attr_ttl_ms: u64,
    /// 单次存储调用的超时（毫秒），为空表示不限制
    pub request_timeout_ms: Option<u64>,
    pub direct_io: bool,
    /// 写入和截断允许的最大文件长度（字节）
    pub max_file_size: u64,
    pub allow_other: bool,
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: "apifs".to_string(),
            subtype: "apifs".to_string(),
            attr_ttl_ms: 1000,
            request_timeout_ms: None,
            direct_io: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allow_other: false,
            auto_unmount: false,
        }
    }
}

impl MountConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 文件读取配置
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| FsError::Validation(format!("invalid config {:?}: {}", path, e)))
    }

    pub fn with_fs_name(mut self, fs_name: impl Into<String>) -> Self {
        self.fs_name = fs_name.into();
        self
    }

    pub fn with_attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_direct_io(mut self, direct_io: bool) -> Self {
        self.direct_io = direct_io;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_allow_other(mut self, allow_other: bool) -> Self {
        self.allow_other = allow_other;
        self
    }

    pub fn with_auto_unmount(mut self, auto_unmount: bool) -> Self {
        self.auto_unmount = auto_unmount;
        self
    }

    pub fn attr_ttl(&self) -> Duration {
        Duration::from_millis(self.attr_ttl_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fs_name.clone()),
            MountOption::Subtype(self.subtype.clone()),
        ];
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        // fusermount 要求 auto_unmount 同时带 allow_other 或 allow_root
        if self.auto_unmount {
            options.push(MountOption::AutoUnmount);
            if !self.allow_other {
                options.push(MountOption::AllowRoot);
            }
        }
        options
    }
}
