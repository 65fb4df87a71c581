//! Provider contract and cross-provider operation engine
//!
//! Every backend implements [`StorageProvider`]. Layered on top of the
//! contract, backend-independent: conflict resolution for upload naming
//! collisions, recursive tree copy/move with bounded concurrency, zip
//! export of folder subtrees, and translation of backend status codes
//! into the gateway error taxonomy.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tokio::time::Instant;

use crate::config::AppConfig;
use crate::item::Item;
use crate::streams::{BoxByteStream, EmptyStream, ZipEntries, ZipEntry, ZipStreamReader};
use crate::{Error, Result};

pub mod filesystem;
pub mod remote;

pub use filesystem::FilesystemProvider;
pub use remote::RemoteProvider;

/// Inclusive byte range from a request: `(start, Some(end))` or open-ended
/// `(start, None)`.
pub type ByteRange = (u64, Option<u64>);

/// Caller-selected strategy for resolving a destination-name collision on
/// upload. Supplied per call, never global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    Warn,
    Replace,
    Rename,
    NewVersion,
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "warn" => Ok(ConflictPolicy::Warn),
            "replace" => Ok(ConflictPolicy::Replace),
            "rename" => Ok(ConflictPolicy::Rename),
            "new_version" => Ok(ConflictPolicy::NewVersion),
            other => Err(Error::InvalidRequest(format!(
                "unknown conflict policy '{other}'"
            ))),
        }
    }
}

/// The polymorphic contract every backend implements.
///
/// Providers are stateless with respect to the entity being operated on:
/// every method takes its target [`Item`] explicitly, so one instance can
/// serve unrelated items concurrently.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolve a caller-supplied identifier into exactly one Item.
    async fn validate_item(&self, identifier: &str) -> Result<Item>;

    /// Current metadata for a resolved item; may re-fetch remotely.
    async fn metadata(&self, item: &Item, version: Option<&str>) -> Result<Item>;

    /// Items directly inside a folder.
    async fn children(&self, item: &Item) -> Result<Vec<Item>>;

    async fn download(
        &self,
        item: &Item,
        range: Option<ByteRange>,
        version: Option<&str>,
    ) -> Result<BoxByteStream>;

    /// Write `stream` under the folder `item` as `new_name`, subject to the
    /// conflict policy. Returns the resulting Item.
    async fn upload(
        &self,
        item: &Item,
        stream: BoxByteStream,
        new_name: &str,
        conflict: ConflictPolicy,
    ) -> Result<Item>;

    async fn delete(&self, item: &Item) -> Result<()>;

    /// Rename in place. The returned Item's id changes for path-addressed
    /// backends.
    async fn rename(&self, item: &Item, new_name: &str) -> Result<Item>;

    async fn create_folder(&self, _item: &Item, _new_name: &str) -> Result<Item> {
        Err(Error::MethodNotSupported("folder creation".to_string()))
    }

    /// The parent folder's metadata. Root is its own parent.
    async fn parent(&self, item: &Item) -> Result<Item>;

    /// Historical versions of a file, newest first.
    async fn versions(&self, _item: &Item) -> Result<Vec<Item>> {
        Ok(Vec::new())
    }

    /// Whether uploads colliding with an existing name can be submitted as
    /// a new version of the existing entity.
    fn supports_new_version(&self) -> bool {
        false
    }

    /// True iff a server-side copy to `other` is possible without a
    /// download+upload round trip.
    fn can_intra_copy(&self, _other: &dyn StorageProvider) -> bool {
        false
    }

    fn can_intra_move(&self, _other: &dyn StorageProvider) -> bool {
        false
    }

    async fn intra_copy(
        &self,
        _item: &Item,
        _dest_folder: &Item,
        _dest: &dyn StorageProvider,
    ) -> Result<Item> {
        Err(Error::MethodNotSupported("intra-provider copy".to_string()))
    }

    /// Backend-native move. Always deletes the source after a successful
    /// intra-provider copy.
    async fn intra_move(
        &self,
        item: &Item,
        dest_folder: &Item,
        dest: &dyn StorageProvider,
    ) -> Result<Item> {
        let copied = self.intra_copy(item, dest_folder, dest).await?;
        self.delete(item).await?;
        Ok(copied)
    }
}

/// Static provider registry, resolved from configuration at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Filesystem,
    Remote,
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "filesystem" => Ok(ProviderKind::Filesystem),
            "remote" => Ok(ProviderKind::Remote),
            other => Err(Error::ProviderNotFound(other.to_string())),
        }
    }
}

/// Construct a provider instance for one logical session.
pub fn make_provider(name: &str, config: &AppConfig) -> Result<Arc<dyn StorageProvider>> {
    match name.parse::<ProviderKind>()? {
        ProviderKind::Filesystem => Ok(Arc::new(FilesystemProvider::new(
            &config.filesystem,
            &config.transfer,
        ))),
        ProviderKind::Remote => Ok(Arc::new(RemoteProvider::new(
            &config.remote,
            &config.transfer,
        )?)),
    }
}

/// Batch size and conflict policy for cross-provider transfers.
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    pub concurrent_ops: usize,
    pub conflict: ConflictPolicy,
}

/// Copy `item` into `dest_folder` on `dest`, taking the intra-provider
/// fast path when the capability predicate holds.
pub async fn copy_item(
    src: &dyn StorageProvider,
    item: &Item,
    dest: &dyn StorageProvider,
    dest_folder: &Item,
    options: TransferOptions,
) -> Result<Item> {
    if src.can_intra_copy(dest) {
        return src.intra_copy(item, dest_folder, dest).await;
    }
    transfer_tree(src, item, dest, dest_folder, options).await
}

/// Move `item` into `dest_folder` on `dest`. The source subtree is deleted
/// only after every child has been copied.
pub async fn move_item(
    src: &dyn StorageProvider,
    item: &Item,
    dest: &dyn StorageProvider,
    dest_folder: &Item,
    options: TransferOptions,
) -> Result<Item> {
    if src.can_intra_move(dest) {
        return src.intra_move(item, dest_folder, dest).await;
    }
    let moved = transfer_tree(src, item, dest, dest_folder, options).await?;
    src.delete(item).await?;
    Ok(moved)
}

/// Recursive tree transfer. The destination folder is created before any
/// of its children are written; children are processed in fixed-size
/// batches, with folder children awaited individually so a nested folder
/// exists before anything tries to nest inside it.
fn transfer_tree<'a>(
    src: &'a dyn StorageProvider,
    item: &'a Item,
    dest: &'a dyn StorageProvider,
    dest_folder: &'a Item,
    options: TransferOptions,
) -> BoxFuture<'a, Result<Item>> {
    async move {
        if item.is_file() {
            let stream = src.download(item, None, None).await?;
            return dest
                .upload(dest_folder, stream, &item.name(), options.conflict)
                .await;
        }

        let new_folder = dest.create_folder(dest_folder, &item.name()).await?;
        let children = src.children(item).await?;

        let mut transferred = Vec::with_capacity(children.len());
        for batch in children.chunks(options.concurrent_ops.max(1)) {
            let mut pending = Vec::new();
            for child in batch {
                let fut = transfer_tree(src, child, dest, &new_folder, options);
                if child.is_folder() {
                    // Await inline: the nested folder must exist at the
                    // destination before its own children are attempted.
                    transferred.push(fut.await?);
                } else {
                    pending.push(fut);
                }
            }
            transferred.extend(futures::future::try_join_all(pending).await?);
        }

        tracing::debug!(
            folder = %new_folder.path,
            children = transferred.len(),
            "folder transfer complete"
        );
        Ok(new_folder)
    }
    .boxed()
}

/// What an upload should do after the conflict policy has been applied.
pub enum UploadDisposition {
    /// Write under this name (the original, or an incremented sibling).
    Write(String),
    /// Submit the content as a new version of this existing entity.
    NewVersion(Item),
}

/// Conflict-resolution state machine, entered whenever an upload targets a
/// name that already exists under the destination folder.
pub async fn resolve_upload_name(
    provider: &dyn StorageProvider,
    parent: &Item,
    new_name: &str,
    conflict: ConflictPolicy,
) -> Result<UploadDisposition> {
    let children = provider.children(parent).await?;
    let blocking = children.iter().find(|child| child.name() == new_name);

    let Some(blocking) = blocking else {
        return Ok(UploadDisposition::Write(new_name.to_string()));
    };

    match conflict {
        ConflictPolicy::Warn => Err(Error::Conflict(new_name.to_string())),
        ConflictPolicy::Replace => {
            provider.delete(blocking).await?;
            Ok(UploadDisposition::Write(new_name.to_string()))
        }
        ConflictPolicy::Rename => {
            let names: Vec<String> = children.iter().map(|child| child.name()).collect();
            let mut count = 1;
            loop {
                let candidate = crate::path::increment_name(new_name, count);
                if !names.iter().any(|name| name == &candidate) {
                    return Ok(UploadDisposition::Write(candidate));
                }
                count += 1;
            }
        }
        ConflictPolicy::NewVersion => {
            if provider.supports_new_version() {
                Ok(UploadDisposition::NewVersion(blocking.clone()))
            } else {
                Err(Error::MethodNotSupported("new_version".to_string()))
            }
        }
    }
}

/// Lazily walk a folder subtree, yielding archive members for every leaf
/// file and for every empty folder. New folders found are appended to a
/// work queue; completeness matters, ordering does not.
pub struct FolderWalker {
    provider: Arc<dyn StorageProvider>,
    root_path: String,
    queue: VecDeque<Item>,
}

#[async_trait]
impl ZipEntries for FolderWalker {
    async fn next_entry(&mut self) -> Result<Option<ZipEntry>> {
        while let Some(item) = self.queue.pop_front() {
            let relative = item
                .path
                .as_str()
                .strip_prefix(&self.root_path)
                .unwrap_or(item.path.as_str())
                .to_string();

            if item.is_file() {
                let stream = self.provider.download(&item, None, None).await?;
                return Ok(Some(ZipEntry::new(relative, stream)));
            }

            let children = self.provider.children(&item).await?;
            if children.is_empty() && !relative.is_empty() {
                return Ok(Some(ZipEntry::new(relative, Box::new(EmptyStream))));
            }
            self.queue.extend(children);
        }
        Ok(None)
    }
}

/// Streaming zip archive of a folder subtree.
pub fn zip_folder(provider: Arc<dyn StorageProvider>, folder: &Item) -> ZipStreamReader {
    let walker = FolderWalker {
        root_path: folder.path.as_str().to_string(),
        queue: VecDeque::from([folder.clone()]),
        provider,
    };
    ZipStreamReader::new(Box::new(walker))
}

/// Translate a backend HTTP status into the gateway error taxonomy. Called
/// at the provider-contract boundary; callers above it never branch on raw
/// status codes.
pub fn translate_status(status: u16, path: &str, message: Option<String>) -> Error {
    match status {
        400 => Error::invalid_path(message.unwrap_or_else(|| format!("'{path}'"))),
        401 => Error::Auth,
        403 => Error::Forbidden,
        404 => Error::not_found(path),
        409 => Error::Conflict(path.to_string()),
        410 => Error::Gone(path.to_string()),
        other => Error::provider(
            other,
            message.unwrap_or_else(|| "unexpected provider response".to_string()),
        ),
    }
}

/// Parse an inbound `Range: bytes=start-end` header. Invalid forms (end
/// before start, negative or non-numeric offsets, suffix ranges) yield
/// `None` and the download proceeds unranged.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        raw => Some(raw.parse::<u64>().ok()?),
    };
    if matches!(end, Some(end) if end < start) {
        return None;
    }
    Some((start, end))
}

/// Render a range as an outbound `Range` header value.
pub fn build_range_header(range: ByteRange) -> String {
    match range {
        (start, Some(end)) => format!("bytes={start}-{end}"),
        (start, None) => format!("bytes={start}-"),
    }
}

/// Bounds concurrent outbound calls to a backend within a rolling time
/// window. Shared per provider instance via `Arc`; protects downstream
/// APIs from burst overload, not used for correctness.
pub struct Throttle {
    concurrency: usize,
    interval: Duration,
    state: tokio::sync::Mutex<ThrottleState>,
}

struct ThrottleState {
    count: usize,
    window_start: Instant,
}

impl Throttle {
    pub fn new(concurrency: usize, interval: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            interval,
            state: tokio::sync::Mutex::new(ThrottleState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// Wait until the current window has capacity for one more call.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if now.duration_since(state.window_start) >= self.interval {
                    state.window_start = now;
                    state.count = 0;
                }
                if state.count < self.concurrency {
                    state.count += 1;
                    return;
                }
                self.interval - now.duration_since(state.window_start)
            };
            tokio::time::sleep(wait).await;
        }
    }
}
