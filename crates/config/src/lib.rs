//! Configuration loading, validation and env substitution.
//!
//! Config files: `postrelay.toml`, `postrelay.yaml` or `postrelay.json`,
//! searched in `./` then `~/.config/postrelay/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{ForwardConfig, MetricsConfig, RelayConfig, StoreConfig, TelegramConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
