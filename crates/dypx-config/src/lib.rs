//! Configuration system for the dypx workflow runner.
//!
//! Provides TOML-based configuration with:
//! - Backend connection settings (`[backend]`), including the transport kind
//! - Retry and polling policy (`[retry]`, `[monitor]`, `[waiter]`)
//! - Failure notification settings (`[notification]`)
//! - Batch defaults (`[batch]`)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, xdg_config_dir,
    xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
