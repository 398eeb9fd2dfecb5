//! Local filesystem drive (`fs`).
//!
//! Exposes one directory, confined under the process-wide local fs root,
//! as a drive. Drive paths are cleaned before they are joined onto the
//! root so `..` segments cannot escape it.

use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

use super::registry::{DriveConfig, DriveEnv};
use super::schema::FormItem;
use super::utils::{clean_path, millis_from_system_time, path_join};
use super::{
    unwrap_entry, Content, ContentReader, Drive, DriveMeta, Entry, EntryMeta, EntryType,
    UploadConfig,
};
use crate::content::copy_with_progress;
use crate::errors::DriveError;
use crate::task::TaskContext;

/// Drive backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDrive {
    root: Arc<PathBuf>,
}

/// Snapshot of one file or directory of a [`LocalDrive`].
#[derive(Debug, Clone)]
pub struct LocalEntry {
    drive: LocalDrive,
    path: String,
    size: i64,
    is_dir: bool,
    mod_time: i64,
}

impl LocalDrive {
    /// Open an existing directory as a drive.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DriveError> {
        let root = root.into();
        let root = root.canonicalize().map_err(|_| {
            DriveError::not_found(format!("root path {} does not exist", root.display()))
        })?;
        if !root.is_dir() {
            return Err(DriveError::not_allowed(format!(
                "root path {} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root: Arc::new(root),
        })
    }

    /// Factory registered as the `fs` drive type.
    ///
    /// The `path` config value is resolved relative to
    /// [`DriveEnv::local_fs_root`] and must not be empty.
    pub fn from_config(config: &DriveConfig, env: &DriveEnv) -> Result<Arc<dyn Drive>, DriveError> {
        let path = clean_path(config.get("path").map(String::as_str).unwrap_or_default());
        if path.is_empty() {
            return Err(DriveError::not_allowed("invalid root path"));
        }
        let drive = LocalDrive::new(env.local_fs_root.join(path))?;
        Ok(Arc::new(drive))
    }

    pub fn config_form() -> Vec<FormItem> {
        vec![FormItem::text("path", "Root path", true)
            .with_description("Directory relative to the local fs root. It must already exist.")]
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = clean_path(path);
        if path.is_empty() {
            return self.root.as_ref().clone();
        }
        self.root.join(path)
    }

    fn new_entry(&self, path: String, metadata: &std::fs::Metadata) -> LocalEntry {
        LocalEntry {
            drive: self.clone(),
            path,
            size: metadata.len() as i64,
            is_dir: metadata.is_dir(),
            mod_time: metadata
                .modified()
                .map(millis_from_system_time)
                .unwrap_or_default(),
        }
    }

    fn owns(&self, entry: &dyn Entry) -> bool {
        entry
            .as_any()
            .downcast_ref::<LocalEntry>()
            .is_some_and(|e| Arc::ptr_eq(&e.drive.root, &self.root))
    }

    async fn stat(&self, path: &str) -> Result<LocalEntry, DriveError> {
        let metadata = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| map_io_error(e, path))?;
        Ok(self.new_entry(clean_path(path), &metadata))
    }

    /// Synchronous directory listing: directories first, then by name.
    fn list_sync(&self, path: &str) -> Result<Vec<LocalEntry>, DriveError> {
        let dir = self.resolve(path);
        let metadata = std::fs::metadata(&dir).map_err(|e| map_io_error(e, path))?;
        if !metadata.is_dir() {
            return Err(DriveError::not_allowed(format!("cannot list a file: {path}")));
        }

        let mut result = Vec::new();
        for item in std::fs::read_dir(&dir).map_err(|e| map_io_error(e, path))? {
            let item = item.map_err(|e| map_io_error(e, path))?;
            let name = item.file_name().to_string_lossy().to_string();
            let metadata = item.metadata().map_err(|e| map_io_error(e, path))?;
            result.push(self.new_entry(path_join(path, &name), &metadata));
        }

        result.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.path.to_lowercase().cmp(&b.path.to_lowercase()))
        });
        Ok(result)
    }
}

#[async_trait::async_trait]
impl Drive for LocalDrive {
    fn meta(&self) -> DriveMeta {
        DriveMeta { can_write: true }
    }

    async fn get(&self, path: &str) -> Result<Box<dyn Entry>, DriveError> {
        Ok(Box::new(self.stat(path).await?))
    }

    async fn list(&self, path: &str) -> Result<Vec<Box<dyn Entry>>, DriveError> {
        let drive = self.clone();
        let path = path.to_string();
        let entries = tokio::task::spawn_blocking(move || drive.list_sync(&path))
            .await
            .map_err(|e| DriveError::Io(std::io::Error::other(e.to_string())))??;
        Ok(entries
            .into_iter()
            .map(|e| Box::new(e) as Box<dyn Entry>)
            .collect())
    }

    async fn make_dir(&self, path: &str) -> Result<Box<dyn Entry>, DriveError> {
        let target = self.resolve(path);
        if exists(&target, path).await? {
            return self.get(path).await;
        }
        tokio::fs::create_dir(&target)
            .await
            .map_err(|e| map_io_error(e, path))?;
        self.get(path).await
    }

    async fn save(
        &self,
        ctx: &dyn TaskContext,
        path: &str,
        _size: i64,
        overwrite: bool,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Box<dyn Entry>, DriveError> {
        let target = self.resolve(path);
        if !overwrite {
            require_file(&target, path, false).await?;
        }
        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(|e| map_io_error(e, path))?;
        let written = copy_with_progress(ctx, reader, &mut file).await?;
        file.flush().await?;
        debug!("Saved {} bytes to {}", written, target.display());

        let metadata = file.metadata().await?;
        Ok(Box::new(self.new_entry(clean_path(path), &metadata)))
    }

    async fn move_entry(
        &self,
        ctx: &dyn TaskContext,
        from: &dyn Entry,
        to: &str,
        overwrite: bool,
    ) -> Result<Box<dyn Entry>, DriveError> {
        let from = unwrap_entry(from, Some(&|e: &dyn Entry| self.owns(e)))
            .ok_or(DriveError::Unsupported)?;
        let from_rel = clean_path(from.path());
        let to_rel = clean_path(to);
        if from_rel.is_empty() || to_rel.is_empty() {
            return Err(DriveError::not_allowed("cannot move the drive root"));
        }

        let from_path = self.resolve(&from_rel);
        let to_path = self.resolve(&to_rel);
        require_file(&from_path, &from_rel, true).await?;
        if exists(&to_path, &to_rel).await? {
            if !overwrite {
                return Err(DriveError::not_allowed(format!("file exists: {to_rel}")));
            }
            self.delete(ctx, &to_rel).await?;
        }
        tokio::fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| map_io_error(e, &from_rel))?;
        self.get(&to_rel).await
    }

    async fn delete(&self, _ctx: &dyn TaskContext, path: &str) -> Result<(), DriveError> {
        if clean_path(path).is_empty() {
            return Err(DriveError::not_allowed("cannot delete the drive root"));
        }
        let target = self.resolve(path);
        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|e| map_io_error(e, path))?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        }
        .map_err(|e| map_io_error(e, path))
    }

    async fn upload(
        &self,
        path: &str,
        size: i64,
        overwrite: bool,
        _extra: &HashMap<String, String>,
    ) -> Result<UploadConfig, DriveError> {
        if !overwrite {
            require_file(&self.resolve(path), path, false).await?;
        }
        Ok(UploadConfig::local(size))
    }
}

impl Entry for LocalEntry {
    fn path(&self) -> &str {
        &self.path
    }

    fn entry_type(&self) -> EntryType {
        if self.is_dir {
            EntryType::Dir
        } else {
            EntryType::File
        }
    }

    fn size(&self) -> i64 {
        if self.is_dir {
            -1
        } else {
            self.size
        }
    }

    fn mod_time(&self) -> i64 {
        self.mod_time
    }

    fn meta(&self) -> EntryMeta {
        EntryMeta {
            can_read: true,
            can_write: true,
            ..Default::default()
        }
    }

    fn drive(&self) -> &dyn Drive {
        &self.drive
    }

    fn content(&self) -> Option<&dyn Content> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[async_trait::async_trait]
impl Content for LocalEntry {
    async fn reader(&self) -> Result<ContentReader, DriveError> {
        if self.is_dir {
            return Err(DriveError::not_allowed(format!(
                "cannot read a directory: {}",
                self.path
            )));
        }
        let file = tokio::fs::File::open(self.drive.resolve(&self.path))
            .await
            .map_err(|e| map_io_error(e, &self.path))?;
        Ok(ContentReader::Seekable(Box::new(file)))
    }
}

/// Map `std::io::Error` to `DriveError` based on error kind.
fn map_io_error(e: std::io::Error, path: &str) -> DriveError {
    match e.kind() {
        std::io::ErrorKind::NotFound => DriveError::not_found(path),
        std::io::ErrorKind::PermissionDenied => {
            DriveError::not_allowed(format!("permission denied: {path}"))
        }
        _ => DriveError::Io(e),
    }
}

async fn exists(target: &Path, path: &str) -> Result<bool, DriveError> {
    match tokio::fs::metadata(target).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(map_io_error(e, path)),
    }
}

/// Fail unless the target's existence matches `require_exists`.
async fn require_file(target: &Path, path: &str, require_exists: bool) -> Result<(), DriveError> {
    let exists = exists(target, path).await?;
    if require_exists && !exists {
        return Err(DriveError::not_found(path));
    }
    if !require_exists && exists {
        return Err(DriveError::not_allowed(format!("file exists: {path}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::DummyContext;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn drive() -> (TempDir, LocalDrive) {
        let dir = TempDir::new().unwrap();
        let drive = LocalDrive::new(dir.path()).unwrap();
        (dir, drive)
    }

    async fn read_all(entry: &dyn Entry) -> Vec<u8> {
        let mut reader = entry.content().unwrap().reader().await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    async fn save_bytes(
        drive: &LocalDrive,
        path: &str,
        data: &[u8],
        overwrite: bool,
    ) -> Result<Box<dyn Entry>, DriveError> {
        let mut reader: &[u8] = data;
        drive
            .save(&DummyContext, path, data.len() as i64, overwrite, &mut reader)
            .await
    }

    #[test]
    fn new_rejects_missing_root() {
        let result = LocalDrive::new("/nonexistent/path/abc123");
        assert!(matches!(result, Err(DriveError::NotFound(_))));
    }

    #[test]
    fn from_config_rejects_empty_path() {
        let dir = TempDir::new().unwrap();
        let env = DriveEnv {
            local_fs_root: dir.path().to_path_buf(),
        };
        let config: DriveConfig = [("path".to_string(), "/../".to_string())].into();
        let result = LocalDrive::from_config(&config, &env);
        assert!(matches!(result, Err(DriveError::NotAllowed(_))));
    }

    #[tokio::test]
    async fn list_empty_dir() {
        let (_dir, drive) = drive();
        assert!(drive.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_returns_dirs_first_with_drive_paths() {
        let (dir, drive) = drive();
        std::fs::write(dir.path().join("b_file.txt"), "content").unwrap();
        std::fs::create_dir(dir.path().join("z_dir")).unwrap();
        std::fs::write(dir.path().join("a_file.txt"), "hello").unwrap();
        std::fs::create_dir_all(dir.path().join("a_dir/nested")).unwrap();

        let entries = drive.list("").await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["a_dir", "z_dir", "a_file.txt", "b_file.txt"]);
        assert_eq!(entries[0].size(), -1);
        assert_eq!(entries[2].size(), 5);
        assert!(entries[2].mod_time() > 0);

        let nested = drive.list("/a_dir/").await.unwrap();
        assert_eq!(nested[0].path(), "a_dir/nested");
        assert_eq!(nested[0].name(), "nested");
    }

    #[tokio::test]
    async fn list_missing_and_file_paths() {
        let (dir, drive) = drive();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();

        let missing = drive.list("missing").await;
        assert!(matches!(missing, Err(DriveError::NotFound(_))));
        let file = drive.list("file.txt").await;
        assert!(matches!(file, Err(DriveError::NotAllowed(_))));
    }

    #[tokio::test]
    async fn get_root_and_missing() {
        let (_dir, drive) = drive();
        let root = drive.get("").await.unwrap();
        assert_eq!(root.path(), "");
        assert!(root.entry_type().is_dir());

        let missing = drive.get("nope.txt").await;
        assert!(missing.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn dot_dot_stays_inside_root() {
        let (dir, drive) = drive();
        std::fs::write(dir.path().join("inside.txt"), "x").unwrap();
        let entry = drive.get("../../inside.txt").await.unwrap();
        assert_eq!(entry.path(), "inside.txt");
    }

    #[tokio::test]
    async fn make_dir_is_idempotent() {
        let (dir, drive) = drive();
        let created = drive.make_dir("photos").await.unwrap();
        assert!(created.entry_type().is_dir());
        let again = drive.make_dir("photos").await.unwrap();
        assert_eq!(again.path(), "photos");
        assert!(dir.path().join("photos").is_dir());
    }

    #[tokio::test]
    async fn save_and_read_back() {
        let (_dir, drive) = drive();
        let entry = save_bytes(&drive, "hello.txt", b"hello, world!", false)
            .await
            .unwrap();
        assert_eq!(entry.path(), "hello.txt");
        assert_eq!(entry.size(), 13);
        assert_eq!(read_all(entry.as_ref()).await, b"hello, world!");
    }

    #[tokio::test]
    async fn save_without_overwrite_refuses_existing() {
        let (dir, drive) = drive();
        std::fs::write(dir.path().join("keep.txt"), "original").unwrap();

        let result = save_bytes(&drive, "keep.txt", b"replacement", false).await;
        assert!(matches!(result, Err(DriveError::NotAllowed(_))));
        assert_eq!(std::fs::read(dir.path().join("keep.txt")).unwrap(), b"original");

        save_bytes(&drive, "keep.txt", b"replacement", true)
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("keep.txt")).unwrap(), b"replacement");
    }

    #[tokio::test]
    async fn reading_a_directory_is_not_allowed() {
        let (_dir, drive) = drive();
        let root = drive.get("").await.unwrap();
        let result = root.content().unwrap().reader().await;
        assert!(matches!(result, Err(DriveError::NotAllowed(_))));
        assert!(matches!(
            root.content().unwrap().url().await,
            Err(DriveError::Unsupported)
        ));
    }

    #[tokio::test]
    async fn move_within_drive() {
        let (dir, drive) = drive();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();

        let from = drive.get("a.txt").await.unwrap();
        let refused = drive
            .move_entry(&DummyContext, from.as_ref(), "b.txt", false)
            .await;
        assert!(matches!(refused, Err(DriveError::NotAllowed(_))));

        let moved = drive
            .move_entry(&DummyContext, from.as_ref(), "b.txt", true)
            .await
            .unwrap();
        assert_eq!(moved.path(), "b.txt");
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"a");
    }

    #[tokio::test]
    async fn move_root_or_foreign_entry_is_refused() {
        let (_dir, drive) = drive();
        let (_other_dir, other) = self::drive();
        other.make_dir("x").await.unwrap();

        let root = drive.get("").await.unwrap();
        let result = drive
            .move_entry(&DummyContext, root.as_ref(), "elsewhere", false)
            .await;
        assert!(matches!(result, Err(DriveError::NotAllowed(_))));

        let foreign = other.get("x").await.unwrap();
        let result = drive
            .move_entry(&DummyContext, foreign.as_ref(), "x", false)
            .await;
        assert!(matches!(result, Err(DriveError::Unsupported)));
    }

    #[tokio::test]
    async fn delete_files_and_trees() {
        let (dir, drive) = drive();
        std::fs::create_dir_all(dir.path().join("tree/inner")).unwrap();
        std::fs::write(dir.path().join("tree/inner/f.txt"), "x").unwrap();
        std::fs::write(dir.path().join("single.txt"), "x").unwrap();

        drive.delete(&DummyContext, "single.txt").await.unwrap();
        drive.delete(&DummyContext, "tree").await.unwrap();
        assert!(!dir.path().join("single.txt").exists());
        assert!(!dir.path().join("tree").exists());

        let missing = drive.delete(&DummyContext, "tree").await;
        assert!(matches!(missing, Err(DriveError::NotFound(_))));
        let root = drive.delete(&DummyContext, "/").await;
        assert!(matches!(root, Err(DriveError::NotAllowed(_))));
    }

    #[tokio::test]
    async fn upload_returns_local_provider() {
        let (dir, drive) = drive();
        std::fs::write(dir.path().join("exists.bin"), "x").unwrap();

        let config = drive
            .upload("new.bin", 10, false, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(config, UploadConfig::local(10));

        let refused = drive.upload("exists.bin", 10, false, &HashMap::new()).await;
        assert!(matches!(refused, Err(DriveError::NotAllowed(_))));
        assert!(drive.upload("exists.bin", 10, true, &HashMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn copy_is_unsupported() {
        let (dir, drive) = drive();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let entry = drive.get("a.txt").await.unwrap();
        let result = drive.copy(&DummyContext, entry.as_ref(), "b.txt", false).await;
        assert!(matches!(result, Err(DriveError::Unsupported)));
    }
}
