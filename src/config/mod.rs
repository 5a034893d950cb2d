// src/config/mod.rs

//! Configuration loading and validation for svcgraph.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate names, dependencies and cycles (`validate.rs`).
//! - Build the service graph from a validated document (`build.rs`).

pub mod build;
pub mod loader;
pub mod model;
pub mod validate;

pub use build::{build_manager, manager_options, shell_options};
pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    ActionConfig, ConfigFile, ConfigSection, DepLists, GroupConfig, RawConfigFile, ServiceConfig,
    Tunables,
};
pub use validate::validate_config;
