use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use fuser::consts::FOPEN_DIRECT_IO;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::{c_int, EINVAL, ENOENT, ENOTDIR};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::MountConfig;
use crate::context::Context;
use crate::error::FsError;
use crate::fs::{clamp_read, DirEntry, DirNode, FileNode, NodeAttr, NodeKind, ROOT_ID};

const BLOCK_SIZE: u32 = 512;

/// 节点编号到名字的映射，只记录名字，不缓存内容。
/// 按内核的 lookup 计数维护，计数归零（forget）时回收。
#[derive(Debug, Default)]
struct NameTable {
    entries: HashMap<u64, (String, u64)>,
}

impl NameTable {
    fn remember(&mut self, id: u64, name: &str) {
        let entry = self
            .entries
            .entry(id)
            .or_insert_with(|| (name.to_string(), 0));
        if entry.0 != name {
            entry.0 = name.to_string();
        }
        entry.1 += 1;
    }

    fn get(&self, id: u64) -> Option<&str> {
        self.entries.get(&id).map(|(name, _)| name.as_str())
    }

    fn forget(&mut self, id: u64, nlookup: u64) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.1 = entry.1.saturating_sub(nlookup);
            if entry.1 == 0 {
                self.entries.remove(&id);
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 把 fuser 的回调转换为节点操作
pub struct FuseAdapter {
    root: DirNode,
    rt: Handle,
    config: MountConfig,
    shutdown: CancellationToken,
    names: Mutex<NameTable>,
    uid: u32,
    gid: u32,
}

impl FuseAdapter {
    pub fn new(root: DirNode, config: MountConfig, rt: Handle, shutdown: CancellationToken) -> Self {
        Self {
            root,
            rt,
            config,
            shutdown,
            names: Mutex::new(NameTable::default()),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    fn ttl(&self) -> Duration {
        self.config.attr_ttl()
    }

    fn request_context(&self) -> Context {
        Context::with_token(self.shutdown.child_token()).with_timeout(self.config.request_timeout())
    }

    fn names(&self) -> MutexGuard<'_, NameTable> {
        self.names.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn file_node(&self, ino: u64) -> Option<FileNode> {
        let name = self.names().get(ino)?.to_string();
        Some(self.root.file(ino, name))
    }

    fn make_file_attr(&self, attr: &NodeAttr) -> FileAttr {
        file_attr(attr, self.uid, self.gid)
    }

    fn reply_file_attr(&self, op: &str, file: &FileNode, reply: ReplyAttr) {
        let ctx = self.request_context();
        match self.rt.block_on(file.attributes(&ctx)) {
            Ok(attr) => reply.attr(&self.ttl(), &self.make_file_attr(&attr)),
            Err(e) => {
                log_failure(op, file.name(), &e);
                reply.error(e.errno());
            }
        }
    }
}

fn file_attr(attr: &NodeAttr, uid: u32, gid: u32) -> FileAttr {
    let now = SystemTime::now();
    FileAttr {
        ino: attr.id,
        size: attr.size,
        blocks: (attr.size + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64,
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: if attr.kind == NodeKind::Directory { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE,
    }
}

/// 目录项列表：`.`、`..` 加上各条目，跳过内核已读过的 `offset` 项。
/// 每项附带下一次续读的偏移。
fn dir_listing(entries: Vec<DirEntry>, offset: i64) -> Vec<(u64, i64, FileType, String)> {
    let skip = usize::try_from(offset).unwrap_or(usize::MAX);
    let dots = [
        (ROOT_ID, FileType::Directory, ".".to_string()),
        (ROOT_ID, FileType::Directory, "..".to_string()),
    ];
    dots.into_iter()
        .chain(
            entries
                .into_iter()
                .map(|entry| (entry.id, file_type(entry.kind), entry.name)),
        )
        .enumerate()
        .skip(skip)
        .map(|(i, (ino, kind, name))| (ino, (i + 1) as i64, kind, name))
        .collect()
}

/// 协议层的偏移不能为负
fn request_offset(offset: i64) -> Result<u64, c_int> {
    u64::try_from(offset).map_err(|_| EINVAL)
}

fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::File => FileType::RegularFile,
    }
}

fn log_failure(op: &str, name: &str, e: &FsError) {
    match e {
        FsError::Store { .. } | FsError::Io(_) => error!("{} error for name={:?}: {}", op, name, e),
        _ => warn!("{} failed for name={:?}: {}", op, name, e),
    }
}

impl Filesystem for FuseAdapter {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != ROOT_ID {
            reply.error(ENOENT);
            return;
        }
        let name = match name.to_str() {
            Some(n) => n,
            None => {
                reply.error(ENOENT);
                return;
            }
        };
        debug!("lookup: {:?}", name);
        let ctx = self.request_context();
        let result = self.rt.block_on(async {
            let file = self.root.lookup(&ctx, name).await?;
            let attr = file.attributes(&ctx).await?;
            Ok::<_, FsError>((file, attr))
        });
        match result {
            Ok((file, attr)) => {
                self.names().remember(file.id(), file.name());
                reply.entry(&self.ttl(), &self.make_file_attr(&attr), 0);
            }
            Err(e) => {
                log_failure("lookup", name, &e);
                reply.error(e.errno());
            }
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr: ino={}", ino);
        if ino == ROOT_ID {
            let attr = self.root.attributes();
            reply.attr(&self.ttl(), &self.make_file_attr(&attr));
            return;
        }
        match self.file_node(ino) {
            Some(file) => self.reply_file_attr("getattr", &file, reply),
            None => {
                warn!("getattr: unknown ino={}", ino);
                reply.error(ENOENT);
            }
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        // 只处理长度变化，权限和时间戳不可修改
        debug!("setattr: ino={}, size={:?}", ino, size);
        if ino == ROOT_ID {
            let attr = self.root.attributes();
            reply.attr(&self.ttl(), &self.make_file_attr(&attr));
            return;
        }
        let Some(file) = self.file_node(ino) else {
            reply.error(ENOENT);
            return;
        };
        let Some(size) = size else {
            self.reply_file_attr("setattr", &file, reply);
            return;
        };
        let ctx = self.request_context();
        match self.rt.block_on(file.truncate(&ctx, size)) {
            Ok(attr) => reply.attr(&self.ttl(), &self.make_file_attr(&attr)),
            Err(e) => {
                log_failure("truncate", file.name(), &e);
                reply.error(e.errno());
            }
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        let Some(file) = self.file_node(ino) else {
            reply.error(ENOENT);
            return;
        };
        debug!("open: {:?}", file.name());
        let ctx = self.request_context();
        match self.rt.block_on(file.open(&ctx)) {
            Ok(_) => {
                let flags = if self.config.direct_io { FOPEN_DIRECT_IO } else { 0 };
                reply.opened(0, flags);
            }
            Err(e) => {
                log_failure("open", file.name(), &e);
                reply.error(e.errno());
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(file) = self.file_node(ino) else {
            reply.error(ENOENT);
            return;
        };
        let offset = match request_offset(offset) {
            Ok(offset) => offset,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        debug!("read: {:?}, offset={}, size={}", file.name(), offset, size);
        let ctx = self.request_context();
        match self.rt.block_on(file.read_all(&ctx)) {
            Ok(data) => reply.data(clamp_read(&data, offset, size)),
            Err(e) => {
                log_failure("read", file.name(), &e);
                reply.error(e.errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(file) = self.file_node(ino) else {
            reply.error(ENOENT);
            return;
        };
        let offset = match request_offset(offset) {
            Ok(offset) => offset,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        debug!("write: {:?}, offset={}, size={}", file.name(), offset, data.len());
        let ctx = self.request_context();
        match self.rt.block_on(file.write(&ctx, offset, data)) {
            Ok(written) => reply.written(written as u32),
            Err(e) => {
                log_failure("write", file.name(), &e);
                reply.error(e.errno());
            }
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let Some(file) = self.file_node(ino) else {
            reply.error(ENOENT);
            return;
        };
        match file.flush() {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        if ino != ROOT_ID {
            reply.error(ENOTDIR);
            return;
        }
        debug!("readdir: offset={}", offset);
        let ctx = self.request_context();
        let listed = match self.rt.block_on(self.root.list_entries(&ctx)) {
            Ok(entries) => entries,
            Err(e) => {
                log_failure("readdir", "", &e);
                reply.error(e.errno());
                return;
            }
        };

        // 内核使用这些编号前会先 lookup，这里不记录名字
        for (entry_ino, next_offset, kind, name) in dir_listing(listed, offset) {
            if reply.add(entry_ino, next_offset, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        let mut names = self.names();
        names.forget(ino, nlookup);
        debug!("forget: ino={}, nlookup={}, remembered={}", ino, nlookup, names.len());
    }

    fn destroy(&mut self) {
        debug!("destroy: cancelling in-flight requests");
        self.shutdown.cancel();
    }
}
