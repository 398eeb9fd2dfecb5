//! Service configuration.
//!
//! Loaded from a JSON file with camelCase keys. Every field has a default,
//! so an absent file (or an empty object) yields a runnable service with no
//! drives.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::drive::{DriveConfig, DriveEnv};
use crate::errors::CoreError;
use crate::permission::{PathPermission, Subject};

/// Top-level configuration of the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Directory under which `fs` drives are confined.
    #[serde(default = "default_local_fs_root")]
    pub local_fs_root: PathBuf,
    /// Where the copy engine stages file content; system temp dir if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub drives: Vec<DriveDefinition>,
    /// The permission rule store.
    #[serde(default)]
    pub permissions: Vec<PathPermission>,
    #[serde(default)]
    pub users: Vec<UserDefinition>,
    /// Seconds a finished task stays queryable before it is evicted.
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,
}

/// One configured drive instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveDefinition {
    /// Name under which the drive is mounted; first segment of logical paths.
    pub name: String,
    /// Registered drive type id (e.g. `"fs"`).
    #[serde(rename = "type")]
    pub drive_type: String,
    #[serde(default)]
    pub config: DriveConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A user allowed to authenticate with HTTP Basic credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefinition {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UserDefinition {
    /// Permission subjects this user acts as: the user plus its groups.
    pub fn subjects(&self) -> Vec<Subject> {
        std::iter::once(Subject::User(self.username.clone()))
            .chain(self.groups.iter().cloned().map(Subject::Group))
            .collect()
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8089))
}

fn default_local_fs_root() -> PathBuf {
    PathBuf::from("./data/local")
}

fn default_task_retention_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            local_fs_root: default_local_fs_root(),
            temp_dir: None,
            drives: Vec::new(),
            permissions: Vec::new(),
            users: Vec::new(),
            task_retention_secs: default_task_retention_secs(),
        }
    }
}

impl AppConfig {
    /// Load and validate the configuration at `path`.
    ///
    /// A missing file yields the defaults. An unreadable file, invalid
    /// JSON or a failed validation is an error.
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: AppConfig = serde_json::from_str(&contents)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        debug!(
            "Loaded config from {}: {} drives, {} rules, {} users",
            path.display(),
            config.drives.len(),
            config.permissions.len(),
            config.users.len()
        );
        Ok(config)
    }

    /// Check drive names and usernames.
    ///
    /// Drive names must be unique, non-empty and free of `/`; usernames
    /// must be unique and non-empty.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut names = HashSet::new();
        for drive in &self.drives {
            if drive.name.is_empty() || drive.name.contains(['/', '\\']) {
                return Err(CoreError::Config(format!(
                    "Invalid drive name: '{}'",
                    drive.name
                )));
            }
            if !names.insert(drive.name.as_str()) {
                return Err(CoreError::Config(format!(
                    "Duplicate drive name: {}",
                    drive.name
                )));
            }
        }

        let mut usernames = HashSet::new();
        for user in &self.users {
            if user.username.is_empty() {
                return Err(CoreError::Config("Empty username".to_string()));
            }
            if !usernames.insert(user.username.as_str()) {
                return Err(CoreError::Config(format!(
                    "Duplicate user: {}",
                    user.username
                )));
            }
        }
        Ok(())
    }

    pub fn drive_env(&self) -> DriveEnv {
        DriveEnv {
            local_fs_root: self.local_fs_root.clone(),
        }
    }

    pub fn find_user(&self, username: &str) -> Option<&UserDefinition> {
        self.users.iter().find(|u| u.username == username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Permission, RuleMode};

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8089".parse().unwrap());
        assert_eq!(config.local_fs_root, PathBuf::from("./data/local"));
        assert!(config.drives.is_empty());
    }

    #[test]
    fn empty_object_yields_defaults() {
        let (_dir, path) = write_config("{}");
        let config = AppConfig::load_from(&path).unwrap();
        assert!(config.temp_dir.is_none());
        assert!(config.users.is_empty());
        assert_eq!(config.task_retention_secs, 3600);
    }

    #[test]
    fn full_config_parses() {
        let (_dir, path) = write_config(
            r#"{
                "listen": "0.0.0.0:9000",
                "localFsRoot": "/srv/drives",
                "tempDir": "/tmp/staging",
                "taskRetentionSecs": 60,
                "drives": [
                    {"name": "home", "type": "fs", "config": {"path": "home"}},
                    {"name": "old", "type": "fs", "config": {"path": "old"}, "enabled": false}
                ],
                "permissions": [
                    {"path": "", "subject": "anonymous", "permission": 1, "mode": "accept"},
                    {
                        "path": "home", "subject": {"group": "staff"},
                        "policy": 2, "permission": 3, "mode": "accept"
                    }
                ],
                "users": [{"username": "alice", "password": "secret", "groups": ["staff"]}]
            }"#,
        );
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.drive_env().local_fs_root, PathBuf::from("/srv/drives"));
        assert_eq!(config.temp_dir, Some(PathBuf::from("/tmp/staging")));
        assert_eq!(config.task_retention_secs, 60);
        assert_eq!(config.drives[0].drive_type, "fs");
        assert_eq!(config.drives[0].config["path"], "home");
        assert!(config.drives[0].enabled);
        assert!(!config.drives[1].enabled);
        assert_eq!(config.permissions[1].subject, Subject::Group("staff".to_string()));
        assert_eq!(config.permissions[1].permission, Permission::READ | Permission::WRITE);
        assert_eq!(config.permissions[1].mode, RuleMode::Accept);

        let alice = config.find_user("alice").unwrap();
        assert_eq!(
            alice.subjects(),
            vec![Subject::User("alice".to_string()), Subject::Group("staff".to_string())]
        );
        assert!(config.find_user("bob").is_none());
    }

    #[test]
    fn invalid_json_is_config_error() {
        let (_dir, path) = write_config("{ not json");
        assert!(matches!(AppConfig::load_from(&path), Err(CoreError::Config(_))));
    }

    #[test]
    fn duplicate_drive_names_are_rejected() {
        let (_dir, path) = write_config(
            r#"{"drives": [
                {"name": "a", "type": "fs"},
                {"name": "a", "type": "fs"}
            ]}"#,
        );
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Duplicate drive name"));
    }

    #[test]
    fn drive_names_cannot_contain_separators() {
        let mut config = AppConfig::default();
        config.drives.push(DriveDefinition {
            name: "a/b".to_string(),
            drive_type: "fs".to_string(),
            config: DriveConfig::new(),
            enabled: true,
        });
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn duplicate_users_are_rejected() {
        let mut config = AppConfig::default();
        for _ in 0..2 {
            config.users.push(UserDefinition {
                username: "alice".to_string(),
                password: "x".to_string(),
                groups: vec![],
            });
        }
        assert!(config.validate().is_err());
    }
}
