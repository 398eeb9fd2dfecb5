//! HTTP routes.
//!
//! Logical paths are `<drive-name>/<path-in-drive>`. Every handler
//! identifies the caller first and checks the permission table before it
//! touches a drive.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use drivehub_core::content::deliver;
use drivehub_core::copy::{
    build_entries_tree, CopyCallback, DeleteSourceAfterCopy, EntryNode,
};
use drivehub_core::drive::utils::{clean_path, is_ancestor_or_self, path_join};
use drivehub_core::drive::{Drive, DriveMeta, DriveTypeInfo, Entry, EntryMeta, EntryType};
use drivehub_core::errors::DriveError;
use drivehub_core::permission::Permission;
use drivehub_core::task::{DummyContext, TaskContext, TaskSnapshot};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;

type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/drives", get(list_drives))
        .route("/api/drive-types", get(list_drive_types))
        .route("/api/entries", get(list_root))
        .route("/api/entries/*path", get(get_entry))
        .route("/content/*path", get(get_content))
        .route("/api/copy", post(copy))
        .route("/api/move", post(move_entry))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/:id", get(get_task).delete(cancel_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// One entry as seen through the logical namespace.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub size: i64,
    pub mod_time: i64,
    pub meta: EntryMeta,
}

impl EntryView {
    fn new(drive_name: &str, entry: &dyn Entry) -> Self {
        let path = path_join(drive_name, entry.path());
        let name = match entry.path() {
            "" => drive_name.to_string(),
            _ => entry.name().to_string(),
        };
        Self {
            name,
            path,
            entry_type: entry.entry_type(),
            size: entry.size(),
            mod_time: entry.mod_time(),
            meta: entry.meta(),
        }
    }
}

/// An entry plus, for directories, the children the caller may read.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryListing {
    pub entry: Option<EntryView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<EntryView>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveView {
    pub name: String,
    pub meta: DriveMeta,
    /// The caller's effective permission bits on the drive root.
    pub permission: Permission,
}

/// Body of copy and move requests.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub overwrite: bool,
}

async fn list_drives(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DriveView>>, ApiError> {
    let caller = Caller::from_headers(&headers, &state.users)?;
    let drives = state
        .drives
        .names()
        .filter_map(|name| {
            let drive = state.drives.get(name)?;
            Some(DriveView {
                name: name.to_string(),
                meta: drive.meta(),
                permission: caller.permission(&state.permissions, name),
            })
        })
        .collect();
    Ok(Json(drives))
}

async fn list_drive_types(State(state): State<SharedState>) -> Json<Vec<DriveTypeInfo>> {
    Json(state.drive_types().to_vec())
}

/// The namespace root: one directory per readable drive.
async fn list_root(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<EntryListing>, ApiError> {
    let caller = Caller::from_headers(&headers, &state.users)?;
    let mut children = Vec::new();
    for name in state.drives.names() {
        if !caller
            .permission(&state.permissions, name)
            .contains(Permission::READ)
        {
            continue;
        }
        if let Some(drive) = state.drives.get(name) {
            let root = drive.get("").await?;
            children.push(EntryView::new(name, root.as_ref()));
        }
    }
    Ok(Json(EntryListing {
        entry: None,
        children: Some(children),
    }))
}

async fn get_entry(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Result<Json<EntryListing>, ApiError> {
    let caller = Caller::from_headers(&headers, &state.users)?;
    let path = clean_path(&path);
    caller.require(&state.permissions, &path, Permission::READ)?;

    let (name, drive, inner) = resolve(&state, &path)?;
    let entry = drive.get(&inner).await?;
    let children = match entry.entry_type() {
        EntryType::Dir => {
            let listed = drive.list(&inner).await?;
            let visible = listed
                .iter()
                .map(|child| EntryView::new(&name, child.as_ref()))
                .filter(|view| {
                    caller
                        .permission(&state.permissions, &view.path)
                        .contains(Permission::READ)
                })
                .collect();
            Some(visible)
        }
        EntryType::File => None,
    };
    Ok(Json(EntryListing {
        entry: Some(EntryView::new(&name, entry.as_ref())),
        children,
    }))
}

async fn get_content(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let caller = Caller::from_headers(request.headers(), &state.users)?;
    let path = clean_path(&path);
    caller.require(&state.permissions, &path, Permission::READ)?;

    let (_, drive, inner) = resolve(&state, &path)?;
    let entry = drive.get(&inner).await?;
    if entry.entry_type().is_dir() {
        return Err(ApiError::BadRequest(format!("'{path}' is a directory")));
    }
    Ok(deliver(state.copier.client(), entry.as_ref(), request).await?)
}

async fn copy(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TaskSnapshot>), ApiError> {
    transfer(&state, &headers, body, false).await
}

async fn move_entry(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TaskSnapshot>), ApiError> {
    transfer(&state, &headers, body, true).await
}

/// Validate a copy or move and run it as a background task.
async fn transfer(
    state: &SharedState,
    headers: &HeaderMap,
    body: TransferRequest,
    is_move: bool,
) -> Result<(StatusCode, Json<TaskSnapshot>), ApiError> {
    let caller = Caller::from_headers(headers, &state.users)?;
    let from = clean_path(&body.from);
    let to = clean_path(&body.to);

    let source_required = match is_move {
        true => Permission::READ | Permission::WRITE,
        false => Permission::READ,
    };
    caller.require(&state.permissions, &from, source_required)?;
    caller.require(&state.permissions, &to, Permission::WRITE)?;

    let (src_name, src_drive, src_path) = resolve(state, &from)?;
    let (dst_name, dst_drive, dst_path) = resolve(state, &to)?;
    if dst_path.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "destination '{to}' must be inside a drive"
        )));
    }
    if is_move && src_path.is_empty() {
        return Err(ApiError::BadRequest(format!("cannot move drive root '{from}'")));
    }
    let same_drive = src_name == dst_name;
    if same_drive && is_ancestor_or_self(&src_path, &dst_path) {
        return Err(ApiError::BadRequest(format!(
            "cannot copy '{from}' into itself"
        )));
    }

    let source = src_drive.get(&src_path).await?;
    let tree = build_entries_tree(source, &DummyContext).await?;
    check_tree(state, &caller, &tree, &src_name, &to, source_required)?;

    let overwrite = body.overwrite;
    let copier = state.copier.clone();
    let name = match is_move {
        true => format!("move {from} to {to}"),
        false => format!("copy {from} to {to}"),
    };
    info!("Starting {}", name);

    let owner = caller.owner().map(str::to_string);
    let handle = state.tasks.spawn_owned(owner, name, move |ctx| async move {
        let ctx: &dyn TaskContext = &*ctx;
        let dst = dst_drive.as_ref();
        match (is_move, same_drive) {
            (true, true) => {
                ctx.total(1);
                src_drive
                    .move_entry(ctx, tree.entry(), &dst_path, overwrite)
                    .await?;
                ctx.progress(1);
            }
            (true, false) => {
                let after: &dyn CopyCallback = &DeleteSourceAfterCopy;
                copier
                    .copy_tree(&tree, dst, &dst_path, overwrite, ctx, Some(after))
                    .await?;
            }
            (false, _) => match dst.copy(ctx, tree.entry(), &dst_path, overwrite).await {
                Err(DriveError::Unsupported) => {
                    copier
                        .copy_tree(&tree, dst, &dst_path, overwrite, ctx, None)
                        .await?;
                }
                result => {
                    result?;
                }
            },
        }
        Ok::<(), DriveError>(())
    });
    Ok((StatusCode::ACCEPTED, Json(handle.snapshot())))
}

/// Check every node of a transfer snapshot: `source_required` on each
/// source path and WRITE on the path it lands on.
fn check_tree(
    state: &AppState,
    caller: &Caller,
    tree: &EntryNode,
    src_drive: &str,
    to: &str,
    source_required: Permission,
) -> Result<(), ApiError> {
    let source = path_join(src_drive, tree.entry().path());
    caller.require(&state.permissions, &source, source_required)?;
    caller.require(&state.permissions, to, Permission::WRITE)?;
    for child in tree.children() {
        let dest = path_join(to, child.entry().name());
        check_tree(state, caller, child, src_drive, &dest, source_required)?;
    }
    Ok(())
}

async fn list_tasks(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Vec<TaskSnapshot>>, ApiError> {
    let caller = Caller::from_headers(&headers, &state.users)?;
    Ok(Json(state.tasks.list_owned(caller.owner())))
}

/// Look up a task on behalf of `caller`. Tasks started by someone else
/// are refused, not hidden.
fn owned_task(state: &AppState, caller: &Caller, id: &str) -> Result<TaskSnapshot, ApiError> {
    let task = state
        .tasks
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("task {id}")))?;
    if task.owner.as_deref() != caller.owner() {
        return Err(caller.denied(format!("task {id}")));
    }
    Ok(task)
}

async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TaskSnapshot>, ApiError> {
    let caller = Caller::from_headers(&headers, &state.users)?;
    owned_task(&state, &caller, &id).map(Json)
}

async fn cancel_task(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let caller = Caller::from_headers(&headers, &state.users)?;
    owned_task(&state, &caller, &id)?;
    match state.tasks.cancel(&id) {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(ApiError::NotFound(format!("task {id}"))),
    }
}

fn resolve(state: &AppState, path: &str) -> Result<(String, Arc<dyn Drive>, String), ApiError> {
    state
        .drives
        .resolve(path)
        .ok_or_else(|| ApiError::NotFound(path.to_string()))
}
