//! Storage contract shared by the local and object-store backends.
//!
//! Each check runs against `LocalStorage` in a temp directory and against
//! `ObjectStorage` over `object_store::memory::InMemory`.

use edgequake_pdfparse::{
    ByteRange, LocalStorage, ObjectStorage, StorageError, StorageProvider, StorageReader,
    StorageTarget, StorageWriter,
};
use object_store::memory::InMemory;
use std::sync::Arc;

trait Store: StorageReader + StorageWriter {}
impl<T: StorageReader + StorageWriter> Store for T {}

async fn contract(store: &dyn Store) {
    // Round trip, nested key.
    store.write("doc/images/a.png", b"0123456789").await.unwrap();
    assert_eq!(&store.read("doc/images/a.png").await.unwrap()[..], b"0123456789");

    // Ranged reads.
    let r = store.read_range("doc/images/a.png", ByteRange::new(2, 3)).await.unwrap();
    assert_eq!(&r[..], b"234");
    let r = store.read_range("doc/images/a.png", ByteRange::new(7, 0)).await.unwrap();
    assert_eq!(&r[..], b"789", "length 0 reads to the end");

    // Past the end: available suffix, then empty.
    let r = store.read_range("doc/images/a.png", ByteRange::new(8, 100)).await.unwrap();
    assert_eq!(&r[..], b"89");
    let r = store.read_range("doc/images/a.png", ByteRange::new(10, 4)).await.unwrap();
    assert!(r.is_empty());
    let r = store.read_range("doc/images/a.png", ByteRange::new(50, 4)).await.unwrap();
    assert!(r.is_empty());

    // Overwrite replaces, never appends.
    store.write("doc/images/a.png", b"xy").await.unwrap();
    assert_eq!(&store.read("doc/images/a.png").await.unwrap()[..], b"xy");

    // Empty objects are fine.
    store.write("empty.json", b"").await.unwrap();
    assert!(store.read("empty.json").await.unwrap().is_empty());

    // Missing key.
    let err = store.read("nope.md").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { ref key } if key == "nope.md"));
    assert_eq!(err.exit_code(), 66);

    // Keys that escape the root.
    for key in ["", "/abs.md", "../up.md", "a/../../b.md"] {
        let err = store.write(key, b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }), "key {key:?}");
        let err = store.read(key).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }), "key {key:?}");
    }
}

#[tokio::test]
async fn local_storage_honours_contract() {
    let dir = tempfile::tempdir().unwrap();
    contract(&LocalStorage::new(dir.path().join("root"))).await;
}

#[tokio::test]
async fn object_storage_honours_contract() {
    let store = ObjectStorage::from_store(Arc::new(InMemory::new()), "bucket-prefix/run");
    contract(&store).await;
}

#[tokio::test]
async fn object_storage_without_prefix_honours_contract() {
    let store = ObjectStorage::from_store(Arc::new(InMemory::new()), "");
    contract(&store).await;
}

#[tokio::test]
async fn local_target_reader_sees_writer_output() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("out/doc/auto");
    let root = root.to_string_lossy();

    let writer = StorageTarget::Local.writer(&root).unwrap();
    writer.write("doc.md", b"# Title\n").await.unwrap();

    let reader = StorageTarget::Local.reader(&root).unwrap();
    assert_eq!(&reader.read("doc.md").await.unwrap()[..], b"# Title\n");
}

#[tokio::test]
async fn sibling_prefixes_do_not_collide() {
    let memory = Arc::new(InMemory::new());
    let images = ObjectStorage::from_store(memory.clone(), "out/doc/auto/images");
    let artifacts = ObjectStorage::from_store(memory, "out/doc/auto");

    images.write("p0000_b000.png", b"png").await.unwrap();
    assert_eq!(&artifacts.read("images/p0000_b000.png").await.unwrap()[..], b"png");
    assert!(matches!(
        artifacts.read("p0000_b000.png").await.unwrap_err(),
        StorageError::NotFound { .. }
    ));
}
