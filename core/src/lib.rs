pub mod config;
pub mod content;
pub mod copy;
pub mod drive;
pub mod errors;
pub mod permission;
pub mod task;
