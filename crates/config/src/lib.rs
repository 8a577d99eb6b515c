//! Configuration loading, validation, and env substitution.
//!
//! Config files: `mingle.toml`, `mingle.yaml`, or `mingle.json`
//! Searched in `./` then `~/.config/mingle/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{discover_and_load, find_or_default_config_path, load_config, save_config},
    schema::{
        ConnConfig, DatabaseConfig, LoggingConfig, MatchConfig, MessageConfig, MingleConfig,
        ServerConfig,
    },
    validate::{Diagnostic, Severity, has_errors, validate},
};
