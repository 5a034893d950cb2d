// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Action '{action}' not found on service '{service}'")]
    ActionNotFound { service: String, action: String },

    #[error("Service '{service}' already has an action named '{action}'")]
    DuplicateAction { service: String, action: String },

    #[error("Duplicate service name: {0}")]
    DuplicateService(String),

    #[error("Illegal dependency from '{from}' to '{to}': {reason}")]
    IllegalDependency {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Cycle detected in dependency graph: {0}")]
    DependencyCycle(String),

    #[error("'{entity}' depends on unknown '{dependency}'")]
    MissingDependency { entity: String, dependency: String },

    #[error("Undefined variable '%{name}' in '{entity}'")]
    UndefinedVariable { entity: String, name: String },

    #[error("Invalid node set '{0}'")]
    InvalidNodeSet(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, GraphError>;
