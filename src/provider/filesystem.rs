//! Local filesystem provider
//!
//! Path-addressed: an item's id is its materialized path, so rename and
//! move change the id. Confined to the configured storage root.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::{FilesystemSection, TransferSection};
use crate::item::{Item, ItemKind};
use crate::path::ItemPath;
use crate::streams::{BoxByteStream, ByteStream, FileStreamReader, HashStreamReader};
use crate::{Error, Result};

use super::{
    resolve_upload_name, ByteRange, ConflictPolicy, StorageProvider, UploadDisposition,
};

pub struct FilesystemProvider {
    root: PathBuf,
    chunk_size: usize,
}

impl FilesystemProvider {
    pub fn new(section: &FilesystemSection, transfer: &TransferSection) -> Self {
        Self {
            root: PathBuf::from(&section.root),
            chunk_size: transfer.chunk_size,
        }
    }

    fn absolute(&self, path: &ItemPath) -> PathBuf {
        self.root.join(path.as_str().trim_start_matches('/'))
    }

    fn item_from(&self, path: ItemPath, meta: &std::fs::Metadata) -> Item {
        let kind = if path.is_folder() {
            ItemKind::Folder
        } else {
            ItemKind::File
        };
        let modified = meta.modified().ok().map(DateTime::<Utc>::from);
        let created = meta.created().ok().map(DateTime::<Utc>::from);
        let etag = format!(
            "{}::{}",
            modified.map(|t| t.timestamp().to_string()).unwrap_or_default(),
            path
        );
        Item {
            provider: "filesystem".to_string(),
            kind,
            id: path.as_str().to_string(),
            size: (kind == ItemKind::File).then(|| meta.len()),
            modified,
            created,
            etag,
            path,
            extra_segments: Vec::new(),
        }
    }

    async fn resolve(&self, path: ItemPath) -> Result<Item> {
        let meta = fs::metadata(self.absolute(&path))
            .await
            .map_err(|_| Error::not_found(path.as_str()))?;
        // A folder addressed without its trailing slash does not resolve.
        if meta.is_dir() != path.is_folder() {
            return Err(Error::not_found(path.as_str()));
        }
        Ok(self.item_from(path, &meta))
    }
}

#[async_trait]
impl StorageProvider for FilesystemProvider {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn validate_item(&self, identifier: &str) -> Result<Item> {
        self.resolve(ItemPath::new(identifier)?).await
    }

    async fn metadata(&self, item: &Item, _version: Option<&str>) -> Result<Item> {
        self.resolve(item.path.clone()).await
    }

    async fn children(&self, item: &Item) -> Result<Vec<Item>> {
        if !item.is_folder() {
            return Err(Error::invalid_path(
                "only folders can be queried for children",
            ));
        }
        let mut entries = fs::read_dir(self.absolute(&item.path)).await?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let meta = entry.metadata().await?;
            let child = item.path.child(&name, meta.is_dir())?;
            children.push(self.item_from(child, &meta));
        }
        Ok(children)
    }

    async fn download(
        &self,
        item: &Item,
        range: Option<ByteRange>,
        _version: Option<&str>,
    ) -> Result<BoxByteStream> {
        if !item.is_file() {
            return Err(Error::invalid_path("cannot download a folder"));
        }
        let range = range.map(|(start, end)| (start, end.unwrap_or(u64::MAX)));
        let reader =
            FileStreamReader::open(self.absolute(&item.path), range, self.chunk_size).await?;
        Ok(Box::new(reader))
    }

    async fn upload(
        &self,
        item: &Item,
        stream: BoxByteStream,
        new_name: &str,
        conflict: ConflictPolicy,
    ) -> Result<Item> {
        if !item.is_folder() {
            return Err(Error::invalid_path("can only upload into a folder"));
        }
        let name = match resolve_upload_name(self, item, new_name, conflict).await? {
            UploadDisposition::Write(name) => name,
            UploadDisposition::NewVersion(_) => {
                return Err(Error::MethodNotSupported("new_version".to_string()))
            }
        };

        let dest = item.path.child(&name, false)?;
        let mut reader = HashStreamReader::new(stream);
        let mut file = fs::File::create(self.absolute(&dest)).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = reader.next_chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(
            path = %dest,
            bytes_uploaded = written,
            sha256 = reader.digest_hex().unwrap_or_default(),
            "upload complete"
        );
        self.resolve(dest).await
    }

    async fn delete(&self, item: &Item) -> Result<()> {
        if item.is_root() {
            return Err(Error::invalid_path("cannot delete the storage root"));
        }
        let abs = self.absolute(&item.path);
        if item.is_file() {
            fs::remove_file(&abs)
                .await
                .map_err(|_| Error::not_found(item.path.as_str()))?;
        } else {
            fs::remove_dir_all(&abs)
                .await
                .map_err(|_| Error::not_found(item.path.as_str()))?;
        }
        Ok(())
    }

    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item> {
        let renamed = item.path.renamed(new_name)?;
        fs::rename(self.absolute(&item.path), self.absolute(&renamed))
            .await
            .map_err(|_| Error::not_found(item.path.as_str()))?;
        self.resolve(renamed).await
    }

    async fn create_folder(&self, item: &Item, new_name: &str) -> Result<Item> {
        if !item.is_folder() {
            return Err(Error::invalid_path(
                "can only create a folder inside a folder",
            ));
        }
        let folder = item.path.child(new_name, true)?;
        // Idempotent: an existing folder of the same name is fine.
        fs::create_dir_all(self.absolute(&folder)).await?;
        self.resolve(folder).await
    }

    async fn parent(&self, item: &Item) -> Result<Item> {
        match item.path.parent() {
            Some(parent) => self.resolve(parent).await,
            None => Ok(item.clone()),
        }
    }

    fn can_intra_copy(&self, other: &dyn StorageProvider) -> bool {
        other.name() == self.name()
    }

    fn can_intra_move(&self, other: &dyn StorageProvider) -> bool {
        other.name() == self.name()
    }

    async fn intra_copy(
        &self,
        item: &Item,
        dest_folder: &Item,
        _dest: &dyn StorageProvider,
    ) -> Result<Item> {
        let dest = dest_folder.path.child(&item.name(), item.is_folder())?;
        let src_abs = self.absolute(&item.path);
        let dest_abs = self.absolute(&dest);
        if item.is_file() {
            fs::copy(&src_abs, &dest_abs)
                .await
                .map_err(|_| Error::not_found(item.path.as_str()))?;
        } else {
            copy_dir_recursive(src_abs, dest_abs).await?;
        }
        self.resolve(dest).await
    }

    async fn intra_move(
        &self,
        item: &Item,
        dest_folder: &Item,
        _dest: &dyn StorageProvider,
    ) -> Result<Item> {
        let dest = dest_folder.path.child(&item.name(), item.is_folder())?;
        fs::rename(self.absolute(&item.path), self.absolute(&dest))
            .await
            .map_err(|_| Error::not_found(item.path.as_str()))?;
        self.resolve(dest).await
    }
}

async fn copy_dir_recursive(src: PathBuf, dest: PathBuf) -> Result<()> {
    let mut queue: VecDeque<(PathBuf, PathBuf)> = VecDeque::from([(src, dest)]);
    while let Some((src, dest)) = queue.pop_front() {
        fs::create_dir_all(&dest).await?;
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let to = dest.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                queue.push_back((entry.path(), to));
            } else {
                fs::copy(entry.path(), &to).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_provider(root: &Path) -> FilesystemProvider {
    FilesystemProvider::new(
        &FilesystemSection {
            root: root.to_string_lossy().to_string(),
        },
        &TransferSection::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{collect, MemoryStream};
    use tempfile::TempDir;

    async fn upload_bytes(
        provider: &FilesystemProvider,
        folder: &Item,
        name: &str,
        content: &[u8],
        conflict: ConflictPolicy,
    ) -> Result<Item> {
        provider
            .upload(
                folder,
                Box::new(MemoryStream::new(content.to_vec())),
                name,
                conflict,
            )
            .await
    }

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let dir = TempDir::new().unwrap();
        let provider = test_provider(dir.path());
        let root = provider.validate_item("/").await.unwrap();

        let item = upload_bytes(&provider, &root, "test.txt", b"hello", ConflictPolicy::Warn)
            .await
            .unwrap();
        assert_eq!(item.id, "/test.txt");
        assert_eq!(item.size, Some(5));
        assert_eq!(item.kind, ItemKind::File);

        let stream = provider.download(&item, None, None).await.unwrap();
        let data = collect(stream).await.unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[tokio::test]
    async fn test_ranged_download_is_partial() {
        let dir = TempDir::new().unwrap();
        let provider = test_provider(dir.path());
        let root = provider.validate_item("/").await.unwrap();
        let item = upload_bytes(
            &provider,
            &root,
            "data.bin",
            b"0123456789",
            ConflictPolicy::Warn,
        )
        .await
        .unwrap();

        let stream = provider
            .download(&item, Some((2, Some(5))), None)
            .await
            .unwrap();
        assert!(stream.partial());
        assert_eq!(stream.content_range().unwrap(), "bytes 2-5/10");
        assert_eq!(stream.size(), Some(4));
        let data = collect(stream).await.unwrap();
        assert_eq!(&data[..], b"2345");
    }

    #[tokio::test]
    async fn test_validate_item_requires_trailing_slash_for_folders() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        let provider = test_provider(dir.path());

        assert!(provider.validate_item("/docs/").await.is_ok());
        assert!(matches!(
            provider.validate_item("/docs").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            provider.validate_item("/missing").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            provider.validate_item("docs").await,
            Err(Error::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_conflict_warn_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let provider = test_provider(dir.path());
        let root = provider.validate_item("/").await.unwrap();

        upload_bytes(&provider, &root, "test.txt", b"old", ConflictPolicy::Warn)
            .await
            .unwrap();
        let err = upload_bytes(&provider, &root, "test.txt", b"new", ConflictPolicy::Warn)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Conflict(ref name) if name == "test.txt"));

        let item = provider.validate_item("/test.txt").await.unwrap();
        let data = collect(provider.download(&item, None, None).await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"old");
    }

    #[tokio::test]
    async fn test_conflict_replace_overwrites() {
        let dir = TempDir::new().unwrap();
        let provider = test_provider(dir.path());
        let root = provider.validate_item("/").await.unwrap();

        upload_bytes(&provider, &root, "test.txt", b"old", ConflictPolicy::Warn)
            .await
            .unwrap();
        let item = upload_bytes(&provider, &root, "test.txt", b"new", ConflictPolicy::Replace)
            .await
            .unwrap();
        assert_eq!(item.id, "/test.txt");

        let children = provider.children(&root).await.unwrap();
        assert_eq!(children.len(), 1);
        let data = collect(provider.download(&item, None, None).await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"new");
    }

    #[tokio::test]
    async fn test_conflict_rename_increments_until_free() {
        let dir = TempDir::new().unwrap();
        let provider = test_provider(dir.path());
        let root = provider.validate_item("/").await.unwrap();

        upload_bytes(&provider, &root, "test.txt", b"a", ConflictPolicy::Warn)
            .await
            .unwrap();
        let second = upload_bytes(&provider, &root, "test.txt", b"b", ConflictPolicy::Rename)
            .await
            .unwrap();
        assert_eq!(second.name(), "test(1).txt");
        let third = upload_bytes(&provider, &root, "test.txt", b"c", ConflictPolicy::Rename)
            .await
            .unwrap();
        assert_eq!(third.name(), "test(2).txt");
    }

    #[tokio::test]
    async fn test_new_version_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let provider = test_provider(dir.path());
        let root = provider.validate_item("/").await.unwrap();

        upload_bytes(&provider, &root, "test.txt", b"a", ConflictPolicy::Warn)
            .await
            .unwrap();
        let err = upload_bytes(
            &provider,
            &root,
            "test.txt",
            b"b",
            ConflictPolicy::NewVersion,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::MethodNotSupported(_)));
    }

    #[tokio::test]
    async fn test_delete_refuses_root() {
        let dir = TempDir::new().unwrap();
        let provider = test_provider(dir.path());
        let root = provider.validate_item("/").await.unwrap();
        assert!(provider.delete(&root).await.is_err());
    }

    #[tokio::test]
    async fn test_rename_changes_id() {
        let dir = TempDir::new().unwrap();
        let provider = test_provider(dir.path());
        let root = provider.validate_item("/").await.unwrap();
        let item = upload_bytes(&provider, &root, "a.txt", b"x", ConflictPolicy::Warn)
            .await
            .unwrap();

        let renamed = provider.rename(&item, "b.txt").await.unwrap();
        assert_eq!(renamed.id, "/b.txt");
        assert!(matches!(
            provider.validate_item("/a.txt").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_folder_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let provider = test_provider(dir.path());
        let root = provider.validate_item("/").await.unwrap();

        let folder = provider.create_folder(&root, "docs").await.unwrap();
        assert_eq!(folder.id, "/docs/");
        assert!(folder.is_folder());
        assert!(provider.create_folder(&root, "docs").await.is_ok());
    }

    #[tokio::test]
    async fn test_parent_of_root_is_root() {
        let dir = TempDir::new().unwrap();
        let provider = test_provider(dir.path());
        let root = provider.validate_item("/").await.unwrap();
        let parent = provider.parent(&root).await.unwrap();
        assert!(parent.is_root());
    }
}
