use crate::logger::{ConsoleTarget, FileRotation};
use anyhow::{Result, anyhow};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub log: Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub log_file_name: Option<String>,
    #[serde(default)]
    pub rotation: FileRotation,
    #[serde(default)]
    pub console: ConsoleTarget,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_level(),
            output_path: None,
            log_file_name: None,
            rotation: FileRotation::default(),
            console: ConsoleTarget::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

/// Loads settings from `path` (or the build profile's default file),
/// with `TEELOG_LOG__*` environment variables taking precedence.
pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(Environment::with_prefix("TEELOG").separator("__"))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
