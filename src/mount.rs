use std::path::{Path, PathBuf};
use std::sync::Arc;

use fuser::BackgroundSession;
use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::MountConfig;
use crate::error::{FsError, Result};
use crate::fs::Root;
use crate::fuse::FuseAdapter;
use crate::store::Store;

/// 当前没有 tokio 运行时时自建一个，并在挂载期间保持存活
fn runtime() -> Result<(Option<Runtime>, Handle)> {
    match Handle::try_current() {
        Ok(handle) => Ok((None, handle)),
        Err(_) => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("apifs-store")
                .build()?;
            let handle = rt.handle().clone();
            Ok((Some(rt), handle))
        }
    }
}

fn require_store(store: Option<Arc<dyn Store>>) -> Result<Arc<dyn Store>> {
    store.ok_or_else(|| FsError::Validation("store cannot be absent".to_string()))
}

/// 挂载并阻塞处理请求，直到文件系统被卸载
pub fn mount(store: Option<Arc<dyn Store>>, mount_point: &Path) -> Result<()> {
    mount_with_config(store, mount_point, MountConfig::default())
}

pub fn mount_with_config(
    store: Option<Arc<dyn Store>>,
    mount_point: &Path,
    config: MountConfig,
) -> Result<()> {
    let store = require_store(store)?;
    let (_runtime, handle) = runtime()?;
    let shutdown = CancellationToken::new();
    let options = config.mount_options();
    let root = Root::new(store).with_max_file_size(config.max_file_size);
    let adapter = FuseAdapter::new(root.root(), config, handle, shutdown.clone());

    info!("Mounting apifs at {:?}", mount_point);
    // 会话在返回时（包括出错）被释放并卸载
    let result = fuser::mount2(adapter, mount_point, &options);
    shutdown.cancel();
    info!("Unmounted apifs at {:?}", mount_point);
    result.map_err(FsError::from)
}

/// 在后台会话中挂载，返回的句柄被丢弃时卸载
pub fn spawn_mount(
    store: Option<Arc<dyn Store>>,
    mount_point: &Path,
    config: MountConfig,
) -> Result<MountHandle> {
    let store = require_store(store)?;
    let (runtime, handle) = runtime()?;
    let shutdown = CancellationToken::new();
    let options = config.mount_options();
    let root = Root::new(store).with_max_file_size(config.max_file_size);
    let adapter = FuseAdapter::new(root.root(), config, handle, shutdown.clone());

    info!("Mounting apifs at {:?} in background", mount_point);
    let session = fuser::spawn_mount2(adapter, mount_point, &options)?;
    Ok(MountHandle {
        session: Some(session),
        shutdown,
        mount_point: mount_point.to_path_buf(),
        runtime,
    })
}

pub struct MountHandle {
    session: Option<BackgroundSession>,
    shutdown: CancellationToken,
    mount_point: PathBuf,
    runtime: Option<Runtime>,
}

impl MountHandle {
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn unmount(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.shutdown.cancel();
        if let Some(session) = self.session.take() {
            session.join();
            info!("Unmounted apifs at {:?}", self.mount_point);
        }
        if let Some(rt) = self.runtime.take() {
            rt.shutdown_background();
        }
    }
}

impl Drop for MountHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}
