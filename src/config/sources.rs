//! Configuration sources layered over the defaults.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File, FileFormat};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `<config_dir>/forge/config.toml`, e.g. `~/.config/forge/config.toml` on Linux
pub fn global_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "forge").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Add the global config file if it exists
pub(super) fn add_global_file(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let Some(path) = global_config_path() else {
        return Ok(builder);
    };
    if !path.exists() {
        debug!(config_path = %path.display(), "No global configuration file");
        return Ok(builder);
    }
    let path = path.canonicalize().unwrap_or(path);
    debug!(config_path = %path.display(), "Loading global configuration");
    Ok(builder.add_source(File::from(path).format(FileFormat::Toml).required(false)))
}

pub(super) fn add_explicit_file(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> ConfigBuilder<DefaultState> {
    debug!(config_path = %path.display(), "Loading configuration file");
    builder.add_source(File::from(path).format(FileFormat::Toml).required(true))
}

/// `FORGE_SCHEDULER__MAX_CONCURRENT_JOBS=8`, `FORGE_SCHEDULER__ENGINE_ORDER=procedural,texture`
pub(super) fn add_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("FORGE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("scheduler.engine_order"),
    )
}
