//! Shared test utilities for drivehub core integration tests.
//!
//! Provides an in-memory entry type for URL-backed and stream-only
//! content, a throwaway HTTP upstream, and helpers to compare directory
//! trees on disk.

// Each integration test is compiled as its own crate, so not every test file
// uses every function from this shared module. Suppress dead_code warnings.
#![allow(dead_code)]

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;

use drivehub_core::drive::{
    Content, ContentReader, ContentUrl, Drive, DriveMeta, Entry, EntryMeta, EntryType,
    UploadConfig,
};
use drivehub_core::errors::DriveError;
use drivehub_core::task::TaskContext;
use tokio::io::AsyncRead;

/// A drive that holds nothing; only used as the owner of [`RemoteEntry`].
pub struct EmptyDrive;

#[async_trait::async_trait]
impl Drive for EmptyDrive {
    fn meta(&self) -> DriveMeta {
        DriveMeta::default()
    }

    async fn get(&self, path: &str) -> Result<Box<dyn Entry>, DriveError> {
        Err(DriveError::not_found(path))
    }

    async fn list(&self, _path: &str) -> Result<Vec<Box<dyn Entry>>, DriveError> {
        Ok(Vec::new())
    }

    async fn make_dir(&self, _path: &str) -> Result<Box<dyn Entry>, DriveError> {
        Err(DriveError::Unsupported)
    }

    async fn save(
        &self,
        _ctx: &dyn TaskContext,
        _path: &str,
        _size: i64,
        _overwrite: bool,
        _reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Box<dyn Entry>, DriveError> {
        Err(DriveError::Unsupported)
    }

    async fn move_entry(
        &self,
        _ctx: &dyn TaskContext,
        _from: &dyn Entry,
        _to: &str,
        _overwrite: bool,
    ) -> Result<Box<dyn Entry>, DriveError> {
        Err(DriveError::Unsupported)
    }

    async fn delete(&self, _ctx: &dyn TaskContext, _path: &str) -> Result<(), DriveError> {
        Err(DriveError::Unsupported)
    }

    async fn upload(
        &self,
        _path: &str,
        _size: i64,
        _overwrite: bool,
        _extra: &HashMap<String, String>,
    ) -> Result<UploadConfig, DriveError> {
        Err(DriveError::Unsupported)
    }
}

/// A file whose content lives behind a URL, in a plain stream, or nowhere.
pub struct RemoteEntry {
    path: String,
    size: i64,
    url: Option<ContentUrl>,
    data: Option<Vec<u8>>,
    drive: EmptyDrive,
}

impl RemoteEntry {
    pub fn with_url(path: &str, url: String, proxy: bool) -> Self {
        Self {
            path: path.to_string(),
            size: -1,
            url: Some(ContentUrl { url, proxy }),
            data: None,
            drive: EmptyDrive,
        }
    }

    /// Content readable only as a non-seekable stream.
    pub fn with_stream(path: &str, data: &[u8]) -> Self {
        Self {
            path: path.to_string(),
            size: data.len() as i64,
            url: None,
            data: Some(data.to_vec()),
            drive: EmptyDrive,
        }
    }

    /// A file without the content capability.
    pub fn unreadable(path: &str) -> Self {
        Self {
            path: path.to_string(),
            size: 0,
            url: None,
            data: None,
            drive: EmptyDrive,
        }
    }
}

impl Entry for RemoteEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn entry_type(&self) -> EntryType {
        EntryType::File
    }

    fn size(&self) -> i64 {
        self.size
    }

    fn mod_time(&self) -> i64 {
        0
    }

    fn meta(&self) -> EntryMeta {
        EntryMeta {
            can_read: self.url.is_some() || self.data.is_some(),
            ..Default::default()
        }
    }

    fn drive(&self) -> &dyn Drive {
        &self.drive
    }

    fn content(&self) -> Option<&dyn Content> {
        if self.url.is_some() || self.data.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait::async_trait]
impl Content for RemoteEntry {
    async fn reader(&self) -> Result<ContentReader, DriveError> {
        match &self.data {
            Some(data) => Ok(ContentReader::Stream(Box::new(Cursor::new(data.clone())))),
            None => Err(DriveError::Unsupported),
        }
    }

    async fn url(&self) -> Result<ContentUrl, DriveError> {
        self.url.clone().ok_or(DriveError::Unsupported)
    }
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn_upstream(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Every path below `root` mapped to its content (`None` for directories).
pub fn tree_snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    let mut result = BTreeMap::new();
    collect(root, root, &mut result);
    result
}

fn collect(root: &Path, dir: &Path, out: &mut BTreeMap<String, Option<Vec<u8>>>) {
    for item in std::fs::read_dir(dir).unwrap() {
        let path = item.unwrap().path();
        let rel = path
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if path.is_dir() {
            out.insert(rel, None);
            collect(root, &path, out);
        } else {
            out.insert(rel, Some(std::fs::read(&path).unwrap()));
        }
    }
}

/// Create `files` (path, content) under `root`, making parent directories.
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let target = root.join(path);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(target, content).unwrap();
    }
}
