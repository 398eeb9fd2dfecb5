//! Runtime drive type registry.
//!
//! Drive types are registered explicitly by the process that owns the
//! registry (the server builds one at startup) and the registry is passed
//! by reference to whatever turns configured drives into instances.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = DriveRegistry::new();
//! registry.register(
//!     "fs",
//!     "Local File System",
//!     "",
//!     LocalDrive::config_form(),
//!     Box::new(LocalDrive::from_config),
//! );
//!
//! let types = registry.available_types();            // list all registered types
//! let drive = registry.create("fs", &config, &env)?;  // create a new instance
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::schema::{validate_config, FormItem};
use super::Drive;
use crate::errors::{CoreError, DriveError};

/// Key/value configuration of one configured drive.
pub type DriveConfig = HashMap<String, String>;

/// Process-level facts handed to every drive factory.
#[derive(Debug, Clone)]
pub struct DriveEnv {
    /// Directory under which local filesystem drives are confined.
    pub local_fs_root: PathBuf,
}

/// Factory function that creates a drive from its configuration.
pub type DriveFactory =
    Box<dyn Fn(&DriveConfig, &DriveEnv) -> Result<Arc<dyn Drive>, DriveError> + Send + Sync>;

/// Metadata about a registered drive type for UI discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveTypeInfo {
    /// Machine-readable identifier (e.g., `"fs"`).
    pub type_id: String,
    /// Human-readable display name.
    pub display_name: String,
    /// Free-form usage notes shown next to the config form.
    pub readme: String,
    /// Configuration form for this drive type.
    pub config_form: Vec<FormItem>,
}

/// Registry of available drive types.
pub struct DriveRegistry {
    factories: HashMap<String, RegistryEntry>,
    /// Insertion order for deterministic iteration.
    order: Vec<String>,
}

struct RegistryEntry {
    info: DriveTypeInfo,
    factory: DriveFactory,
}

impl DriveRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a drive type. Registering an existing `type_id` again
    /// replaces its factory but keeps its position.
    pub fn register(
        &mut self,
        type_id: &str,
        display_name: &str,
        readme: &str,
        config_form: Vec<FormItem>,
        factory: DriveFactory,
    ) {
        let info = DriveTypeInfo {
            type_id: type_id.to_string(),
            display_name: display_name.to_string(),
            readme: readme.to_string(),
            config_form,
        };
        if !self.factories.contains_key(type_id) {
            self.order.push(type_id.to_string());
        }
        self.factories
            .insert(type_id.to_string(), RegistryEntry { info, factory });
    }

    /// List all registered drive types in registration order.
    pub fn available_types(&self) -> Vec<DriveTypeInfo> {
        self.order
            .iter()
            .filter_map(|id| self.factories.get(id).map(|e| e.info.clone()))
            .collect()
    }

    /// Create a drive instance by type ID.
    ///
    /// The config is validated against the type's form before the factory
    /// runs; validation failures are reported as [`CoreError::Config`].
    pub fn create(
        &self,
        type_id: &str,
        config: &DriveConfig,
        env: &DriveEnv,
    ) -> Result<Arc<dyn Drive>, CoreError> {
        let entry = self
            .factories
            .get(type_id)
            .ok_or_else(|| CoreError::Config(format!("Unknown drive type: {type_id}")))?;

        let errors = validate_config(&entry.info.config_form, config);
        if !errors.is_empty() {
            return Err(CoreError::Config(errors.join("; ")));
        }
        Ok((entry.factory)(config, env)?)
    }

    /// Check whether a drive type is registered.
    pub fn has_type(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }
}

impl Default for DriveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::LocalDrive;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn env(root: &std::path::Path) -> DriveEnv {
        DriveEnv {
            local_fs_root: root.to_path_buf(),
        }
    }

    fn failing_factory() -> DriveFactory {
        Box::new(|_: &DriveConfig, _: &DriveEnv| Err(DriveError::Unsupported))
    }

    #[test]
    fn register_and_create() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("share")).unwrap();

        let mut registry = DriveRegistry::new();
        registry.register(
            "fs",
            "Local File System",
            "",
            LocalDrive::config_form(),
            Box::new(LocalDrive::from_config),
        );

        let config: DriveConfig = [("path".to_string(), "share".to_string())].into();
        let drive = registry.create("fs", &config, &env(tmp.path())).unwrap();
        assert!(drive.meta().can_write);
    }

    #[test]
    fn unknown_type_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = DriveRegistry::new();
        match registry.create("nonexistent", &DriveConfig::new(), &env(tmp.path())) {
            Err(err) => {
                let msg = err.to_string();
                assert!(msg.contains("Unknown drive type"));
                assert!(msg.contains("nonexistent"));
            }
            Ok(_) => panic!("expected error for unknown type"),
        }
    }

    #[test]
    fn missing_required_field_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = DriveRegistry::new();
        registry.register(
            "fs",
            "Local File System",
            "",
            LocalDrive::config_form(),
            Box::new(LocalDrive::from_config),
        );
        let result = registry.create("fs", &DriveConfig::new(), &env(tmp.path()));
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[test]
    fn factory_errors_are_wrapped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = DriveRegistry::new();
        registry.register("broken", "Broken", "", vec![], failing_factory());
        let result = registry.create("broken", &DriveConfig::new(), &env(tmp.path()));
        assert!(matches!(
            result,
            Err(CoreError::Drive(DriveError::Unsupported))
        ));
    }

    #[test]
    fn available_types_preserves_registration_order() {
        let mut registry = DriveRegistry::new();
        registry.register("c", "C", "", vec![], failing_factory());
        registry.register("a", "A", "", vec![], failing_factory());
        registry.register("b", "B", "", vec![], failing_factory());
        registry.register("c", "C again", "", vec![], failing_factory());

        let types = registry.available_types();
        let ids: Vec<&str> = types.iter().map(|t| t.type_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(types[0].display_name, "C again");
    }

    #[test]
    fn factory_runs_on_each_create() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let factory: DriveFactory = Box::new(move |_: &DriveConfig, _: &DriveEnv| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Err(DriveError::Unsupported)
        });

        let mut registry = DriveRegistry::new();
        registry.register("counting", "Counting", "", vec![], factory);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let _ = registry.create("counting", &DriveConfig::new(), &env(tmp.path()));
        let _ = registry.create("counting", &DriveConfig::new(), &env(tmp.path()));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn has_type_and_default() {
        let mut registry = DriveRegistry::default();
        assert!(registry.available_types().is_empty());
        registry.register("fs", "FS", "", vec![], failing_factory());
        assert!(registry.has_type("fs"));
        assert!(!registry.has_type("s3"));
    }
}
