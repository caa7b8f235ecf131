use std::fs;
use std::path::{Path, PathBuf};

use crate::model::config::CanopyConfig;

pub const CONFIG_FILE: &str = "config.toml";

/// Error type for reading and writing config.toml
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config.toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not serialize config.toml: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Read `config.toml` from the canopy directory. A missing file means defaults.
pub fn read_config(canopy_dir: &Path) -> Result<CanopyConfig, ConfigError> {
    let path = canopy_dir.join(CONFIG_FILE);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CanopyConfig::default()),
        Err(source) => Err(ConfigError::Read { path, source }),
    }
}

pub fn write_config(canopy_dir: &Path, config: &CanopyConfig) -> Result<(), ConfigError> {
    let path = canopy_dir.join(CONFIG_FILE);
    let text = toml::to_string_pretty(config)?;
    fs::write(&path, text).map_err(|source| ConfigError::Write { path, source })
}
