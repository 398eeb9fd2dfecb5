//! Drive and entry capability traits.
//!
//! Every backend implements [`Drive`] for its namespace and [`Entry`] for
//! the snapshot handles it hands out. Content access is an optional
//! capability: entries that can be read return `Some(&dyn Content)` from
//! [`Entry::content()`], and content may additionally expose a direct URL.
//!
//! Concrete drivers live in submodules ([`local`]); they are created
//! through a [`DriveRegistry`] populated at startup.

pub mod local;
pub mod registry;
pub mod schema;
pub mod utils;

pub use local::{LocalDrive, LocalEntry};
pub use registry::{DriveConfig, DriveEnv, DriveFactory, DriveRegistry, DriveTypeInfo};
pub use schema::{validate_config, FieldType, FormItem, SelectOption};

use std::any::Any;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::errors::DriveError;
use crate::task::TaskContext;
use utils::path_base;

/// Whether an entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Dir,
}

impl EntryType {
    pub fn is_file(self) -> bool {
        self == Self::File
    }

    pub fn is_dir(self) -> bool {
        self == Self::Dir
    }
}

/// Capability flags of a single entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    pub can_read: bool,
    pub can_write: bool,
    /// The entry is another drive's root grafted into this namespace.
    #[serde(default)]
    pub is_mount: bool,
    /// Extension hint for entries whose name does not carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
}

/// Static capabilities of a drive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveMeta {
    pub can_write: bool,
}

/// A direct URL to an entry's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUrl {
    pub url: String,
    /// The URL is not reachable by clients and must be reverse-proxied
    /// instead of redirected to.
    pub proxy: bool,
}

/// Upload session description returned by [`Drive::upload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    /// Upload provider name, `"local"` when bytes are posted to this service.
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl UploadConfig {
    /// Upload through this service and hand the bytes to [`Drive::save`].
    pub fn local(size: i64) -> Self {
        Self {
            provider: "local".to_string(),
            config: Some(serde_json::json!({ "size": size })),
        }
    }
}

/// A readable byte source that can also seek.
pub trait AsyncReadSeek: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> AsyncReadSeek for T {}

/// Byte stream opened on an entry.
///
/// Seekable readers can serve range requests; plain streams can only be
/// copied through from start to end.
pub enum ContentReader {
    Seekable(Box<dyn AsyncReadSeek>),
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl AsyncRead for ContentReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ContentReader::Seekable(r) => Pin::new(r).poll_read(cx, buf),
            ContentReader::Stream(r) => Pin::new(r).poll_read(cx, buf),
        }
    }
}

/// Optional content capability of an entry.
#[async_trait::async_trait]
pub trait Content: Send + Sync {
    /// Open a byte stream on the entry.
    async fn reader(&self) -> Result<ContentReader, DriveError>;

    /// A direct URL to the bytes, if the backend has one.
    async fn url(&self) -> Result<ContentUrl, DriveError> {
        Err(DriveError::Unsupported)
    }
}

/// Immutable snapshot of one object in a drive, taken at lookup time.
pub trait Entry: Send + Sync {
    /// Backend-relative path, normalized, without leading/trailing slash.
    fn path(&self) -> &str;

    fn name(&self) -> &str {
        path_base(self.path())
    }

    fn entry_type(&self) -> EntryType;

    /// Size in bytes; `-1` for directories.
    fn size(&self) -> i64;

    /// Modification time in milliseconds since the Unix epoch.
    fn mod_time(&self) -> i64;

    fn meta(&self) -> EntryMeta;

    /// The drive this entry was obtained from.
    fn drive(&self) -> &dyn Drive;

    /// Content capability; `None` when the entry cannot be read.
    fn content(&self) -> Option<&dyn Content> {
        None
    }

    /// The wrapped entry, for entries that decorate another one.
    fn inner(&self) -> Option<&dyn Entry> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Walk the wrapper chain of `entry`.
///
/// With a test, returns the first entry in the chain that satisfies it
/// (or `None`). Without one, returns the innermost entry.
pub fn unwrap_entry<'a>(
    entry: &'a dyn Entry,
    test: Option<&dyn Fn(&dyn Entry) -> bool>,
) -> Option<&'a dyn Entry> {
    let mut current = entry;
    loop {
        if let Some(test) = test {
            if test(current) {
                return Some(current);
            }
        }
        match current.inner() {
            Some(inner) => current = inner,
            None => break,
        }
    }
    match test {
        Some(_) => None,
        None => Some(current),
    }
}

/// Root-scoped namespace over one backend.
///
/// Operations are keyed by drive path; a drive manufactures snapshot
/// entries on demand and owns none of them.
#[async_trait::async_trait]
pub trait Drive: Send + Sync {
    fn meta(&self) -> DriveMeta;

    /// Look up one entry; [`DriveError::NotFound`] when absent.
    async fn get(&self, path: &str) -> Result<Box<dyn Entry>, DriveError>;

    /// List the children of a directory.
    async fn list(&self, path: &str) -> Result<Vec<Box<dyn Entry>>, DriveError>;

    /// Create a directory. Returns the existing entry if already present.
    async fn make_dir(&self, path: &str) -> Result<Box<dyn Entry>, DriveError>;

    /// Write a file from `reader`. `size` is the expected length, `-1` if unknown.
    async fn save(
        &self,
        ctx: &dyn TaskContext,
        path: &str,
        size: i64,
        overwrite: bool,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Box<dyn Entry>, DriveError>;

    /// Backend-native copy. Callers fall back to the copy engine on
    /// [`DriveError::Unsupported`].
    async fn copy(
        &self,
        _ctx: &dyn TaskContext,
        _from: &dyn Entry,
        _to: &str,
        _overwrite: bool,
    ) -> Result<Box<dyn Entry>, DriveError> {
        Err(DriveError::Unsupported)
    }

    /// Move an entry of this drive to `to`.
    async fn move_entry(
        &self,
        ctx: &dyn TaskContext,
        from: &dyn Entry,
        to: &str,
        overwrite: bool,
    ) -> Result<Box<dyn Entry>, DriveError>;

    async fn delete(&self, ctx: &dyn TaskContext, path: &str) -> Result<(), DriveError>;

    /// Prepare an upload session for a file of `size` bytes.
    async fn upload(
        &self,
        path: &str,
        size: i64,
        overwrite: bool,
        extra: &HashMap<String, String>,
    ) -> Result<UploadConfig, DriveError>;
}
