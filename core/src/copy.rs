//! Recursive copy of entry trees between drives.
//!
//! A copy runs in two phases. The source subtree is first listed into an
//! [`EntryNode`] tree; the tree is then replayed depth-first into the
//! destination drive, directories before their children. File content is
//! staged into a temporary local file before the destination's
//! [`Drive::save`] consumes it, so any source transport works with any
//! destination.
//!
//! The tree is a snapshot: changes to the source after listing are not
//! noticed during the write phase.

use std::path::PathBuf;

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::content::stage_content;
use crate::drive::utils::{clean_path, path_join};
use crate::drive::{Drive, Entry, EntryType};
use crate::errors::DriveError;
use crate::task::{CancelOnly, TaskContext};

/// One source entry plus, for directories, its listed children.
pub struct EntryNode {
    entry: Box<dyn Entry>,
    children: Vec<EntryNode>,
}

impl EntryNode {
    pub fn entry(&self) -> &dyn Entry {
        self.entry.as_ref()
    }

    pub fn children(&self) -> &[EntryNode] {
        &self.children
    }

    /// Number of nodes in this subtree, including this one.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(EntryNode::count).sum::<usize>()
    }
}

/// List `root` and everything below it.
///
/// The running node count is reported through [`TaskContext::total`] as
/// directories are expanded. Cancellation is checked before each node.
pub async fn build_entries_tree(
    root: Box<dyn Entry>,
    ctx: &dyn TaskContext,
) -> Result<EntryNode, DriveError> {
    let mut total: i64 = 1;
    ctx.total(total);
    build_node(root, &mut total, ctx).await
}

fn build_node<'a>(
    entry: Box<dyn Entry>,
    total: &'a mut i64,
    ctx: &'a dyn TaskContext,
) -> BoxFuture<'a, Result<EntryNode, DriveError>> {
    Box::pin(async move {
        if ctx.is_cancelled() {
            return Err(DriveError::Cancelled);
        }
        if entry.entry_type().is_file() {
            return Ok(EntryNode {
                entry,
                children: Vec::new(),
            });
        }

        let listed = entry.drive().list(entry.path()).await?;
        *total += listed.len() as i64;
        ctx.total(*total);

        let mut children = Vec::with_capacity(listed.len());
        for child in listed {
            children.push(build_node(child, total, ctx).await?);
        }
        Ok(EntryNode { entry, children })
    })
}

/// Hook invoked after each node of a copy has been handled.
#[async_trait::async_trait]
pub trait CopyCallback: Send + Sync {
    /// `all_processed` is false when the node, or anything below it, was
    /// skipped because the destination already existed.
    async fn after(
        &self,
        entry: &dyn Entry,
        all_processed: bool,
        ctx: &dyn TaskContext,
    ) -> Result<(), DriveError>;
}

struct NoopCallback;

#[async_trait::async_trait]
impl CopyCallback for NoopCallback {
    async fn after(&self, _: &dyn Entry, _: bool, _: &dyn TaskContext) -> Result<(), DriveError> {
        Ok(())
    }
}

/// Deletes every fully copied node from its source drive.
///
/// Turns a copy into a move. Directories are deleted after their
/// children, and only when nothing below them was skipped.
pub struct DeleteSourceAfterCopy;

#[async_trait::async_trait]
impl CopyCallback for DeleteSourceAfterCopy {
    async fn after(
        &self,
        entry: &dyn Entry,
        all_processed: bool,
        ctx: &dyn TaskContext,
    ) -> Result<(), DriveError> {
        if !all_processed {
            return Ok(());
        }
        debug!("Deleting copied source {}", entry.path());
        entry.drive().delete(ctx, entry.path()).await
    }
}

/// Result of a completed copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Nodes handled, skipped ones included.
    pub processed: i64,
    /// False if any file was skipped because it already existed.
    pub all_processed: bool,
}

/// The cross-drive copy engine.
#[derive(Clone)]
pub struct Copier {
    client: reqwest::Client,
    temp_dir: Option<PathBuf>,
}

impl Copier {
    /// `client` fetches URL-backed content; staged files go to `temp_dir`
    /// (the system temp directory when `None`).
    pub fn new(client: reqwest::Client, temp_dir: Option<PathBuf>) -> Self {
        Self { client, temp_dir }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Copy `source` to `to` on `dest`, preferring the destination
    /// drive's native copy and falling back to [`Copier::copy_all`].
    pub async fn copy(
        &self,
        source: Box<dyn Entry>,
        dest: &dyn Drive,
        to: &str,
        overwrite: bool,
        ctx: &dyn TaskContext,
    ) -> Result<CopyOutcome, DriveError> {
        match dest.copy(ctx, source.as_ref(), to, overwrite).await {
            Ok(_) => Ok(CopyOutcome {
                processed: 1,
                all_processed: true,
            }),
            Err(DriveError::Unsupported) => {
                self.copy_all(source, dest, to, overwrite, ctx, None).await
            }
            Err(e) => Err(e),
        }
    }

    /// Copy `source` to `to` on `dest`, then remove each fully copied
    /// node from the source drive.
    pub async fn move_all(
        &self,
        source: Box<dyn Entry>,
        dest: &dyn Drive,
        to: &str,
        overwrite: bool,
        ctx: &dyn TaskContext,
    ) -> Result<CopyOutcome, DriveError> {
        self.copy_all(source, dest, to, overwrite, ctx, Some(&DeleteSourceAfterCopy)).await
    }

    /// Recursively copy `source` to `to` on `dest`.
    ///
    /// An existing destination file is skipped unless `overwrite` is set.
    /// A file/directory mismatch between source and destination fails
    /// with [`DriveError::NotAllowed`]. The first error aborts the whole
    /// copy; nothing already written is rolled back.
    ///
    /// Progress is the running count of handled nodes.
    pub async fn copy_all(
        &self,
        source: Box<dyn Entry>,
        dest: &dyn Drive,
        to: &str,
        overwrite: bool,
        ctx: &dyn TaskContext,
        after: Option<&dyn CopyCallback>,
    ) -> Result<CopyOutcome, DriveError> {
        let tree = build_entries_tree(source, ctx).await?;
        self.copy_tree(&tree, dest, to, overwrite, ctx, after).await
    }

    /// Replay an already listed tree into `dest`.
    ///
    /// Same semantics as [`Copier::copy_all`] for callers that inspect the
    /// snapshot before copying it.
    pub async fn copy_tree(
        &self,
        tree: &EntryNode,
        dest: &dyn Drive,
        to: &str,
        overwrite: bool,
        ctx: &dyn TaskContext,
        after: Option<&dyn CopyCallback>,
    ) -> Result<CopyOutcome, DriveError> {
        let path = tree.entry().path();
        debug!("Copying {} nodes from {} to {}", tree.count(), path, to);
        ctx.total(tree.count() as i64);

        let after = after.unwrap_or(&NoopCallback);
        let mut processed = 0;
        let all_processed = self
            .copy_node(
                tree,
                dest,
                clean_path(to),
                overwrite,
                ctx,
                false,
                after,
                &mut processed,
            )
            .await?;
        Ok(CopyOutcome {
            processed,
            all_processed,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_node<'a>(
        &'a self,
        node: &'a EntryNode,
        dest: &'a dyn Drive,
        to: String,
        overwrite: bool,
        ctx: &'a dyn TaskContext,
        new_parent: bool,
        after: &'a dyn CopyCallback,
        processed: &'a mut i64,
    ) -> BoxFuture<'a, Result<bool, DriveError>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return Err(DriveError::Cancelled);
            }
            let entry = node.entry();

            // A freshly created parent has no children yet.
            let existing = if new_parent {
                None
            } else {
                match dest.get(&to).await {
                    Ok(found) => Some(found.entry_type()),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e),
                }
            };

            let mut all_processed = true;
            match entry.entry_type() {
                EntryType::Dir => {
                    let created = match existing {
                        Some(EntryType::File) => {
                            return Err(DriveError::not_allowed(format!(
                                "dest '{}' is a file, but src '{}' is a dir",
                                to,
                                entry.path()
                            )))
                        }
                        Some(EntryType::Dir) => false,
                        None => {
                            dest.make_dir(&to).await?;
                            debug!("Created directory {}", to);
                            true
                        }
                    };
                    for child in node.children() {
                        let child_to = path_join(&to, child.entry().name());
                        let child_done = self
                            .copy_node(
                                child,
                                dest,
                                child_to,
                                overwrite,
                                ctx,
                                created,
                                after,
                                processed,
                            )
                            .await?;
                        all_processed &= child_done;
                    }
                }
                EntryType::File => match existing {
                    Some(EntryType::Dir) => {
                        return Err(DriveError::not_allowed(format!(
                            "dest '{}' is a dir, but src '{}' is a file",
                            to,
                            entry.path()
                        )))
                    }
                    Some(EntryType::File) if !overwrite => {
                        debug!("Skipping existing file {}", to);
                        all_processed = false;
                    }
                    _ => self.copy_file(entry, dest, &to, ctx).await?,
                },
            }

            after.after(entry, all_processed, &CancelOnly(ctx)).await?;
            *processed += 1;
            ctx.progress(*processed);
            Ok(all_processed)
        })
    }

    async fn copy_file(
        &self,
        entry: &dyn Entry,
        dest: &dyn Drive,
        to: &str,
        ctx: &dyn TaskContext,
    ) -> Result<(), DriveError> {
        let content = entry.content().ok_or_else(|| {
            DriveError::not_allowed(format!("file '{}' is not readable", entry.path()))
        })?;
        let inner = CancelOnly(ctx);
        let mut staged =
            stage_content(&self.client, content, self.temp_dir.as_deref(), &inner).await?;
        dest.save(&inner, to, staged.size(), true, staged.file_mut()).await?;
        debug!("Copied {} to {} ({} bytes)", entry.path(), to, staged.size());
        Ok(())
    }
}
