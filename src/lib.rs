pub mod config;
pub mod context;
pub mod error;
pub mod fs;
pub mod fuse;
pub mod mount;
pub mod store;

pub use config::MountConfig;
pub use context::Context;
pub use error::{FsError, Result, StoreError};
pub use fs::{DirEntry, DirNode, FileNode, NodeAttr, NodeKind, Root};
pub use fuse::FuseAdapter;
pub use mount::{mount, mount_with_config, spawn_mount, MountHandle};
pub use store::{Item, LocalStore, MemoryStore, Store};
