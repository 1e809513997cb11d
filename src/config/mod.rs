// src/config/mod.rs

//! Configuration loading and validation for flowdag.
//!
//! - `model.rs`: the TOML-backed raw model and the validated [`ConfigFile`].
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: `TryFrom<RawConfigFile> for ConfigFile`.
//! - `duration.rs`: `"500ms"` / `"30s"` style duration strings.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, EngineSection, FlowConfig, FlowDefinition, JobConfig, QuotaSection, RawConfigFile,
};
