pub mod config_cmd;
pub mod run;
pub mod tools;

use std::path::Path;
use toolloop_config::{AppConfig, ConfigError};

/// Load the config from an explicit path or the default location, then
/// apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env();
            Ok(config)
        }
        None => AppConfig::load(),
    }
}
