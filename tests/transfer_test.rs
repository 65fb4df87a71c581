//! Cross-provider transfer tests
//!
//! These tests run the streaming copy/move engine between two providers
//! with disjoint storage roots and verify the destination subtree is
//! isomorphic to the source.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use tempfile::TempDir;

use aqueduct::config::{FilesystemSection, TransferSection};
use aqueduct::item::Item;
use aqueduct::provider::{
    copy_item, move_item, ByteRange, ConflictPolicy, FilesystemProvider, StorageProvider,
    TransferOptions,
};
use aqueduct::streams::{collect, BoxByteStream};
use aqueduct::{Error, Result};

/// A filesystem provider under a different provider name. Capability
/// predicates compare names, so transfers to or from a mirror always take
/// the streaming download+upload path instead of a same-backend shortcut.
struct MirrorProvider(FilesystemProvider);

impl MirrorProvider {
    fn new(root: &Path) -> Self {
        Self(FilesystemProvider::new(
            &FilesystemSection {
                root: root.to_string_lossy().into_owned(),
            },
            &TransferSection::default(),
        ))
    }
}

#[async_trait]
impl StorageProvider for MirrorProvider {
    fn name(&self) -> &'static str {
        "mirror"
    }

    async fn validate_item(&self, identifier: &str) -> Result<Item> {
        self.0.validate_item(identifier).await
    }

    async fn metadata(&self, item: &Item, version: Option<&str>) -> Result<Item> {
        self.0.metadata(item, version).await
    }

    async fn children(&self, item: &Item) -> Result<Vec<Item>> {
        self.0.children(item).await
    }

    async fn download(
        &self,
        item: &Item,
        range: Option<ByteRange>,
        version: Option<&str>,
    ) -> Result<BoxByteStream> {
        self.0.download(item, range, version).await
    }

    async fn upload(
        &self,
        item: &Item,
        stream: BoxByteStream,
        new_name: &str,
        conflict: ConflictPolicy,
    ) -> Result<Item> {
        self.0.upload(item, stream, new_name, conflict).await
    }

    async fn delete(&self, item: &Item) -> Result<()> {
        self.0.delete(item).await
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item> {
        self.0.rename(item, new_name).await
    }

    async fn create_folder(&self, item: &Item, new_name: &str) -> Result<Item> {
        self.0.create_folder(item, new_name).await
    }

    async fn parent(&self, item: &Item) -> Result<Item> {
        self.0.parent(item).await
    }
}

fn seed_tree(root: &Path) {
    fs::create_dir_all(root.join("docs/nested")).unwrap();
    fs::create_dir_all(root.join("docs/empty")).unwrap();
    fs::write(root.join("docs/a.txt"), b"alpha").unwrap();
    fs::write(root.join("docs/b.bin"), vec![7u8; 4096]).unwrap();
    fs::write(root.join("docs/nested/c.txt"), b"gamma").unwrap();
}

fn providers(src_dir: &TempDir, dest_dir: &TempDir) -> (FilesystemProvider, MirrorProvider) {
    let src = FilesystemProvider::new(
        &FilesystemSection {
            root: src_dir.path().to_string_lossy().into_owned(),
        },
        &TransferSection::default(),
    );
    (src, MirrorProvider::new(dest_dir.path()))
}

fn options(conflict: ConflictPolicy) -> TransferOptions {
    TransferOptions {
        concurrent_ops: 2,
        conflict,
    }
}

async fn read_file(provider: &dyn StorageProvider, path: &str) -> Vec<u8> {
    let item = provider.validate_item(path).await.unwrap();
    let stream = provider.download(&item, None, None).await.unwrap();
    collect(stream).await.unwrap().to_vec()
}

#[tokio::test]
async fn test_copy_tree_across_providers() {
    let src_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    seed_tree(src_dir.path());
    let (src, dest) = providers(&src_dir, &dest_dir);

    let folder = src.validate_item("/docs/").await.unwrap();
    let dest_root = dest.validate_item("/").await.unwrap();

    let copied = copy_item(
        &src,
        &folder,
        &dest,
        &dest_root,
        options(ConflictPolicy::Warn),
    )
    .await
    .unwrap();
    assert!(copied.is_folder());

    assert_eq!(read_file(&dest, "/docs/a.txt").await, b"alpha");
    assert_eq!(read_file(&dest, "/docs/b.bin").await, vec![7u8; 4096]);
    assert_eq!(read_file(&dest, "/docs/nested/c.txt").await, b"gamma");

    // Empty folders are materialized too.
    let empty = dest.validate_item("/docs/empty/").await.unwrap();
    assert!(empty.is_folder());
    assert!(dest.children(&empty).await.unwrap().is_empty());

    // The source is untouched by a copy.
    assert_eq!(read_file(&src, "/docs/a.txt").await, b"alpha");
}

#[tokio::test]
async fn test_move_tree_deletes_source_after_copy() {
    let src_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    seed_tree(src_dir.path());
    let (src, dest) = providers(&src_dir, &dest_dir);

    let folder = src.validate_item("/docs/").await.unwrap();
    let dest_root = dest.validate_item("/").await.unwrap();

    move_item(
        &src,
        &folder,
        &dest,
        &dest_root,
        options(ConflictPolicy::Warn),
    )
    .await
    .unwrap();

    assert_eq!(read_file(&dest, "/docs/nested/c.txt").await, b"gamma");
    assert!(matches!(
        src.validate_item("/docs/").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_copy_into_occupied_destination_honors_conflict_policy() {
    let src_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    seed_tree(src_dir.path());
    fs::create_dir_all(dest_dir.path().join("docs")).unwrap();
    fs::write(dest_dir.path().join("docs/a.txt"), b"old").unwrap();
    let (src, dest) = providers(&src_dir, &dest_dir);

    let folder = src.validate_item("/docs/").await.unwrap();
    let dest_root = dest.validate_item("/").await.unwrap();

    let warned = copy_item(
        &src,
        &folder,
        &dest,
        &dest_root,
        options(ConflictPolicy::Warn),
    )
    .await;
    assert!(matches!(warned, Err(Error::Conflict(_))));

    copy_item(
        &src,
        &folder,
        &dest,
        &dest_root,
        options(ConflictPolicy::Replace),
    )
    .await
    .unwrap();
    assert_eq!(read_file(&dest, "/docs/a.txt").await, b"alpha");
}

#[tokio::test]
async fn test_copy_single_file() {
    let src_dir = TempDir::new().unwrap();
    let dest_dir = TempDir::new().unwrap();
    seed_tree(src_dir.path());
    let (src, dest) = providers(&src_dir, &dest_dir);

    let file = src.validate_item("/docs/a.txt").await.unwrap();
    let dest_root = dest.validate_item("/").await.unwrap();

    let copied = copy_item(
        &src,
        &file,
        &dest,
        &dest_root,
        options(ConflictPolicy::Warn),
    )
    .await
    .unwrap();
    assert!(copied.is_file());
    assert_eq!(copied.size, Some(5));
    assert_eq!(read_file(&dest, "/a.txt").await, b"alpha");
}
