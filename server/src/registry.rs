//! Server-side [`DriveRegistry`] setup.
//!
//! Registers every drive type the server can mount so configured drives
//! can be created generically by `type`.

use drivehub_core::drive::{DriveRegistry, LocalDrive};

/// Build a [`DriveRegistry`] with all drive types available to the server.
pub fn build_registry() -> DriveRegistry {
    let mut registry = DriveRegistry::new();

    // Local filesystem, confined under the configured local fs root
    registry.register(
        "fs",
        "Local File System",
        "Exposes a directory below the server's local fs root.",
        LocalDrive::config_form(),
        Box::new(LocalDrive::from_config),
    );

    registry
}
