use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use apifs::{spawn_mount, LocalStore, MemoryStore, MountConfig, Store};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Mount a keyed item store as a flat filesystem", long_about = None)]
struct Args {
    /// 挂载点路径
    #[arg(short, long)]
    mount: PathBuf,

    /// 使用本地目录作为存储
    #[arg(short, long, conflicts_with = "seed")]
    dir: Option<PathBuf>,

    /// 内存存储的初始内容（JSON 对象：名字 -> 内容）
    #[arg(short, long)]
    seed: Option<PathBuf>,

    /// 挂载配置文件（JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,
}

async fn build_store(args: &Args) -> Result<Arc<dyn Store>> {
    if let Some(dir) = &args.dir {
        if !dir.is_dir() {
            bail!("store directory {:?} does not exist", dir);
        }
        info!("使用本地目录存储: {:?}", dir);
        return Ok(Arc::new(LocalStore::new(dir.clone())));
    }

    let entries: BTreeMap<String, String> = match &args.seed {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading seed file {:?}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing seed file {:?}", path))?
        }
        None => BTreeMap::from([
            ("foo".to_string(), "bar".to_string()),
            ("moo".to_string(), "cow".to_string()),
        ]),
    };
    info!("使用内存存储，条目数={}", entries.len());
    Ok(Arc::new(MemoryStore::from_entries(entries).await))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志系统
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => MountConfig::from_file(path)?,
        None => MountConfig::default(),
    };
    let store = build_store(&args).await?;

    // 确保挂载点目录存在
    if !args.mount.exists() {
        info!("创建挂载点目录: {:?}", args.mount);
        std::fs::create_dir_all(&args.mount)
            .with_context(|| format!("creating mount point {:?}", args.mount))?;
    }

    let handle = spawn_mount(Some(store), &args.mount, config)
        .with_context(|| format!("mounting at {:?}", args.mount))?;
    info!("文件系统已挂载到 {:?}，等待中断信号...", handle.mount_point());

    signal::ctrl_c().await.context("listening for Ctrl+C")?;
    info!("接收到中断信号，准备卸载文件系统...");

    // 卸载会阻塞到后台会话结束
    tokio::task::spawn_blocking(move || handle.unmount()).await?;
    info!("done");
    Ok(())
}
