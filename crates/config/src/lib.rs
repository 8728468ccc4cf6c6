//! Configuration loading, validation, and env substitution.
//!
//! Config files: `etm.yaml`, `etm.yml`, `etm.toml`, or `etm.json`.
//! Searched in `./` then the user config dir (`~/.config/etm/` on Linux).
//!
//! Supports `${ENV_VAR}` substitution in the raw file text. A config that
//! fails validation is fatal: nothing downstream starts without one.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        DATABASE_FILENAME, config_dir, discover_and_load, find_config_file, load_config,
        resolve_data_dir, validate_file,
    },
    schema::{EtmConfig, Flags},
    validate::{Diagnostic, Severity, ValidationResult, build_config, validate_value},
};
