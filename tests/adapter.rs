use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apifs::{
    Context, FsError, Item, MemoryStore, NodeKind, Root, Store, StoreError,
};
use async_trait::async_trait;

async fn seeded(entries: &[(&str, &str)]) -> (Arc<MemoryStore>, Root) {
    let store = Arc::new(
        MemoryStore::from_entries(entries.iter().map(|(n, d)| (n.to_string(), d.to_string())))
            .await,
    );
    let root = Root::new(store.clone());
    (store, root)
}

/// 写入总是失败的存储
#[derive(Debug)]
struct FailingWrites {
    inner: MemoryStore,
    writes: AtomicUsize,
}

#[async_trait]
impl Store for FailingWrites {
    async fn list<'a>(&'a self, ctx: &'a Context) -> Result<Vec<Item>, StoreError> {
        self.inner.list(ctx).await
    }

    async fn lookup<'a>(&'a self, ctx: &'a Context, name: &'a str) -> Result<Item, StoreError> {
        self.inner.lookup(ctx, name).await
    }

    async fn write<'a>(
        &'a self,
        _ctx: &'a Context,
        _name: &'a str,
        _data: &'a [u8],
    ) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Backend("read-only replica".to_string()))
    }
}

/// 每次调用都挂起很久的存储
#[derive(Debug)]
struct Stalled;

#[async_trait]
impl Store for Stalled {
    async fn list<'a>(&'a self, _ctx: &'a Context) -> Result<Vec<Item>, StoreError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }

    async fn lookup<'a>(&'a self, _ctx: &'a Context, name: &'a str) -> Result<Item, StoreError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Item::new(2, name, "late"))
    }

    async fn write<'a>(
        &'a self,
        _ctx: &'a Context,
        _name: &'a str,
        _data: &'a [u8],
    ) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_listing_matches_store() {
    let (store, root) = seeded(&[("foo", "bar"), ("moo", "cow"), ("empty", "")]).await;
    let ctx = Context::new();

    let entries = root.root().list_entries(&ctx).await.unwrap();
    let got: HashSet<(u64, String)> = entries.iter().map(|e| (e.id, e.name.clone())).collect();
    let want: HashSet<(u64, String)> = store
        .list(&ctx)
        .await
        .unwrap()
        .into_iter()
        .map(|item| (item.id, item.name))
        .collect();

    assert_eq!(entries.len(), 3);
    assert_eq!(got, want);
    assert!(entries.iter().all(|e| e.kind == NodeKind::File));
}

#[tokio::test]
async fn test_empty_store_lists_nothing() {
    let (_store, root) = seeded(&[]).await;
    let entries = root.root().list_entries(&Context::new()).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_lookup_and_attributes() {
    let (store, root) = seeded(&[("foo", "data")]).await;
    let ctx = Context::new();
    let dir = root.root();

    let file = dir.lookup(&ctx, "foo").await.unwrap();
    assert_eq!(file.name(), "foo");
    let attr = file.attributes(&ctx).await.unwrap();
    assert_eq!(attr.id, file.id());
    assert_eq!(attr.size, 4);
    assert_eq!(attr.kind, NodeKind::File);
    assert_eq!(attr.perm, 0o600);

    // 属性反映调用时刻的内容
    store.insert("foo", "longer data").await;
    assert_eq!(file.attributes(&ctx).await.unwrap().size, 11);

    let err = dir.lookup(&ctx, "missing").await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(ref n) if n == "missing"));
    assert_eq!(err.errno(), libc::ENOENT);
}

#[tokio::test]
async fn test_read_slicing() {
    let (_store, root) = seeded(&[("foo", "data")]).await;
    let ctx = Context::new();
    let file = root.root().lookup(&ctx, "foo").await.unwrap();

    assert_eq!(file.read_all(&ctx).await.unwrap(), b"data");
    assert_eq!(file.read(&ctx, 1, 3).await.unwrap(), b"ata");
    assert_eq!(file.read(&ctx, 4, 0).await.unwrap(), b"");

    let err = file.read(&ctx, 2, 3).await.unwrap_err();
    assert!(matches!(
        err,
        FsError::Range { offset: 2, size: 3, len: 4, .. }
    ));
    let err = file.read(&ctx, u64::MAX, 2).await.unwrap_err();
    assert!(matches!(err, FsError::Range { .. }));
}

#[tokio::test]
async fn test_write_splice_table() {
    let cases = [
        ("noop", 0, "", "data"),
        ("replace same len", 0, "text", "text"),
        ("replace longer", 0, "longertext", "longertext"),
        ("replace and keep", 1, "u", "duta"),
        ("append and grow", 2, "text", "datext"),
    ];
    for (name, offset, data, want) in cases {
        let (store, root) = seeded(&[("foo", "data")]).await;
        let ctx = Context::new();
        let file = root.root().lookup(&ctx, "foo").await.unwrap();

        let written = file.write(&ctx, offset, data.as_bytes()).await.unwrap();
        assert_eq!(written, data.len(), "{}", name);
        assert_eq!(store.get("foo").await.unwrap(), want.as_bytes(), "{}", name);
    }
}

#[tokio::test]
async fn test_write_reports_bytes_accepted() {
    let (store, root) = seeded(&[("foo", "0123456789")]).await;
    let ctx = Context::new();
    let file = root.root().lookup(&ctx, "foo").await.unwrap();

    // 结果变短
    assert_eq!(file.write(&ctx, 8, b"abcd").await.unwrap(), 4);
    assert_eq!(store.get("foo").await.unwrap(), b"01234567abcd");
    // 结果长度不变
    assert_eq!(file.write(&ctx, 2, b"XYZ").await.unwrap(), 3);
    assert_eq!(store.get("foo").await.unwrap(), b"01XYZ567abcd");
    // 从头覆盖并截断
    assert_eq!(file.write(&ctx, 0, b"hello world!!").await.unwrap(), 13);
    assert_eq!(store.get("foo").await.unwrap(), b"hello world!!");
}

#[tokio::test]
async fn test_empty_write_skips_store() {
    let store = Arc::new(FailingWrites {
        inner: MemoryStore::from_entries([("foo", "data")]).await,
        writes: AtomicUsize::new(0),
    });
    let ctx = Context::new();
    let file = Root::new(store.clone()).root().lookup(&ctx, "foo").await.unwrap();

    assert_eq!(file.write(&ctx, 0, b"").await.unwrap(), 0);
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_store_write_failure_leaves_content() {
    let store = Arc::new(FailingWrites {
        inner: MemoryStore::from_entries([("foo", "data")]).await,
        writes: AtomicUsize::new(0),
    });
    let ctx = Context::new();
    let file = Root::new(store.clone()).root().lookup(&ctx, "foo").await.unwrap();

    let err = file.write(&ctx, 1, b"u").await.unwrap_err();
    match &err {
        FsError::Store { op, name, .. } => {
            assert_eq!(*op, "write");
            assert_eq!(name, "foo");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.errno(), libc::EIO);
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    assert_eq!(store.inner.get("foo").await.unwrap(), b"data");
}

#[tokio::test]
async fn test_not_found_propagation() {
    let (store, root) = seeded(&[("foo", "data")]).await;
    let ctx = Context::new();
    let dir = root.root();
    let file = dir.lookup(&ctx, "foo").await.unwrap();

    // 节点仍在，但条目已从存储中消失
    let ghost = dir.file(file.id() + 100, "ghost");
    assert!(ghost.attributes(&ctx).await.unwrap_err().is_not_found());
    assert!(ghost.read_all(&ctx).await.unwrap_err().is_not_found());
    assert!(ghost.read(&ctx, 0, 1).await.unwrap_err().is_not_found());
    assert!(ghost.write(&ctx, 0, b"x").await.unwrap_err().is_not_found());
    assert!(ghost.open(&ctx).await.unwrap_err().is_not_found());
    assert!(store.get("ghost").await.is_none());
}

#[tokio::test]
async fn test_no_cross_request_caching() {
    let (store, root) = seeded(&[("foo", "data")]).await;
    let ctx = Context::new();
    let dir = root.root();

    let first = dir.lookup(&ctx, "foo").await.unwrap();
    let second = first.open(&ctx).await.unwrap();

    first.write(&ctx, 0, b"text").await.unwrap();
    assert_eq!(second.read_all(&ctx).await.unwrap(), b"text");

    // 外部修改同样可见
    store.insert("foo", "external").await;
    assert_eq!(first.read_all(&ctx).await.unwrap(), b"external");
    assert_eq!(second.attributes(&ctx).await.unwrap().size, 8);
    assert!(first.flush().is_ok());
}

#[tokio::test]
async fn test_writers_on_different_names_do_not_interfere() {
    let (store, root) = seeded(&[("a", "aaaa"), ("b", "bbbb")]).await;
    let dir = root.root();

    let mut tasks = Vec::new();
    for name in ["a", "b"] {
        let dir = dir.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = Context::new();
            let file = dir.lookup(&ctx, name).await.unwrap();
            file.write(&ctx, 1, b"ZZ").await.unwrap()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), 2);
    }
    assert_eq!(store.get("a").await.unwrap(), b"aZZa");
    assert_eq!(store.get("b").await.unwrap(), b"bZZb");
}

#[tokio::test]
async fn test_cancellation_aborts_store_call() {
    let root = Root::new(Arc::new(Stalled));
    let dir = root.root();
    let ctx = Context::new();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = dir.lookup(&ctx, "foo").await.unwrap_err();
    assert!(matches!(err, FsError::Cancelled { op: "lookup", .. }));
    assert_eq!(err.errno(), libc::EINTR);
}

#[tokio::test]
async fn test_request_timeout() {
    let root = Root::new(Arc::new(Stalled));
    let ctx = Context::new().with_timeout(Some(Duration::from_millis(20)));

    let err = root.root().list_entries(&ctx).await.unwrap_err();
    assert!(matches!(err, FsError::TimedOut { op: "list", .. }));

    let file = root.root().file(2, "foo");
    let err = file.write(&ctx, 0, b"x").await.unwrap_err();
    assert!(matches!(err, FsError::TimedOut { op: "lookup", .. }));
}

#[tokio::test]
async fn test_truncate_then_rewrite() {
    let (store, root) = seeded(&[("foo", "hello world")]).await;
    let ctx = Context::new();
    let file = root.root().lookup(&ctx, "foo").await.unwrap();

    // 先截断再从头写入，旧内容不应残留
    let attr = file.truncate(&ctx, 0).await.unwrap();
    assert_eq!(attr.size, 0);
    assert_eq!(attr.id, file.id());
    assert_eq!(file.write(&ctx, 0, b"hi\n").await.unwrap(), 3);
    assert_eq!(store.get("foo").await.unwrap(), b"hi\n");

    // 扩展时以 0 填充
    assert_eq!(file.truncate(&ctx, 5).await.unwrap().size, 5);
    assert_eq!(store.get("foo").await.unwrap(), b"hi\n\0\0");
    assert_eq!(file.attributes(&ctx).await.unwrap().size, 5);
}

#[tokio::test]
async fn test_truncate_same_length_skips_store() {
    let store = Arc::new(FailingWrites {
        inner: MemoryStore::from_entries([("foo", "data")]).await,
        writes: AtomicUsize::new(0),
    });
    let ctx = Context::new();
    let file = Root::new(store.clone()).root().lookup(&ctx, "foo").await.unwrap();

    assert_eq!(file.truncate(&ctx, 4).await.unwrap().size, 4);
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);

    let err = file.truncate(&ctx, 1).await.unwrap_err();
    assert!(matches!(err, FsError::Store { op: "write", .. }));
    assert_eq!(store.inner.get("foo").await.unwrap(), b"data");

    let ghost = Root::new(store.clone()).root().file(99, "ghost");
    assert!(ghost.truncate(&ctx, 0).await.unwrap_err().is_not_found());
}
