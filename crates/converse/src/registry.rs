//! Read-only registries shared by concurrent requests
pub mod capability;
pub mod tools;
