//! Shared server state: mounted drives, permission rules, users and tasks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use drivehub_core::config::{AppConfig, UserDefinition};
use drivehub_core::copy::Copier;
use drivehub_core::drive::utils::clean_path;
use drivehub_core::drive::{Drive, DriveRegistry, DriveTypeInfo};
use drivehub_core::permission::PermissionTable;
use drivehub_core::task::TaskManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives mounted by name. Logical paths are `<name>/<path-in-drive>`.
#[derive(Default)]
pub struct DriveTable {
    drives: BTreeMap<String, Arc<dyn Drive>>,
}

impl DriveTable {
    /// Create every enabled drive in `config`. Drives that fail to
    /// initialize are logged and left unmounted.
    pub fn from_config(config: &AppConfig, registry: &DriveRegistry) -> Self {
        let env = config.drive_env();
        let mut table = Self::default();
        for def in config.drives.iter().filter(|d| d.enabled) {
            match registry.create(&def.drive_type, &def.config, &env) {
                Ok(drive) => {
                    info!("Mounted drive '{}' ({})", def.name, def.drive_type);
                    table.insert(&def.name, drive);
                }
                Err(e) => warn!("Failed to mount drive '{}': {}", def.name, e),
            }
        }
        table
    }

    pub fn insert(&mut self, name: &str, drive: Arc<dyn Drive>) {
        self.drives.insert(name.to_string(), drive);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drives.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Drive>> {
        self.drives.get(name)
    }

    /// Split a logical path into drive name, drive and path inside it.
    pub fn resolve(&self, logical: &str) -> Option<(String, Arc<dyn Drive>, String)> {
        let logical = clean_path(logical);
        let (name, inner) = match logical.split_once('/') {
            Some((name, inner)) => (name, inner),
            None => (logical.as_str(), ""),
        };
        self.drives
            .get(name)
            .map(|drive| (name.to_string(), drive.clone(), inner.to_string()))
    }
}

/// State shared by every request handler.
pub struct AppState {
    pub drives: DriveTable,
    pub permissions: PermissionTable,
    pub users: Vec<UserDefinition>,
    pub tasks: TaskManager,
    pub copier: Copier,
    /// How long finished tasks are kept before the sweeper evicts them.
    pub task_retention: Duration,
    drive_types: Vec<DriveTypeInfo>,
}

impl AppState {
    pub fn new(config: &AppConfig, registry: &DriveRegistry) -> Self {
        Self {
            drives: DriveTable::from_config(config, registry),
            permissions: PermissionTable::new(config.permissions.clone()),
            users: config.users.clone(),
            tasks: TaskManager::new(),
            copier: Copier::new(reqwest::Client::new(), config.temp_dir.clone()),
            task_retention: Duration::from_secs(config.task_retention_secs),
            drive_types: registry.available_types(),
        }
    }

    pub fn drive_types(&self) -> &[DriveTypeInfo] {
        &self.drive_types
    }
}

/// Periodically evict tasks that finished more than `task_retention` ago.
pub fn spawn_task_sweeper(
    state: Arc<AppState>,
    every: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Task sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = state.tasks.remove_expired(state.task_retention);
                    if removed > 0 {
                        debug!("Evicted {} finished tasks", removed);
                    }
                }
            }
        }
    })
}
