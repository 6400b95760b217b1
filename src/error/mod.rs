use thiserror::Error;

/// 存储后端返回的错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Range error: {name}: offset {offset} + size {size} exceeds length {len}")]
    Range {
        name: String,
        offset: u64,
        size: u64,
        len: u64,
    },

    #[error("File too large: {name}: size {size} exceeds limit {limit}")]
    TooLarge { name: String, size: u64, limit: u64 },

    #[error("Store error: {op} {name:?}: {source}")]
    Store {
        op: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("Cancelled: {op} {name:?}")]
    Cancelled { op: &'static str, name: String },

    #[error("Timed out: {op} {name:?}")]
    TimedOut { op: &'static str, name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// 将存储错误转换为文件系统错误，NotFound 单独映射
    pub fn from_store(op: &'static str, name: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => FsError::NotFound(name.to_string()),
            source => FsError::Store {
                op,
                name: name.to_string(),
                source,
            },
        }
    }

    /// 协议层使用的 errno
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::Validation(_) => libc::EINVAL,
            FsError::NotFound(_) => libc::ENOENT,
            FsError::Range { .. } => libc::EINVAL,
            FsError::TooLarge { .. } => libc::EFBIG,
            FsError::Store { .. } => libc::EIO,
            FsError::Cancelled { .. } => libc::EINTR,
            FsError::TimedOut { .. } => libc::ETIMEDOUT,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
