// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - [`model`] defines the raw and validated config types.
//! - [`loader`] reads TOML from disk.
//! - [`validate`] implements `TryFrom<RawConfigFile> for ConfigFile`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    AdapterKind, AdapterSection, ConfigFile, EngineSection, InitFailurePolicy, RawConfigFile,
};
