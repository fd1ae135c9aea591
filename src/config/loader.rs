//! Route configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::RouteConfig;
use crate::config::validation::{validate_route, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Json(serde_json::Error),
    UnsupportedFormat(PathBuf),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Toml(e) => write!(f, "Parse error: {}", e),
            ConfigError::Json(e) => write!(f, "Parse error: {}", e),
            ConfigError::UnsupportedFormat(path) => {
                write!(f, "Unsupported config format: {}", path.display())
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// True if the file extension names a format the loader understands.
pub fn is_route_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("toml") | Some("json")
    )
}

/// Load, validate and normalize a route config from a TOML or JSON file.
pub fn load_route_config(path: &Path) -> Result<RouteConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: RouteConfig = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(ConfigError::Toml)?,
        Some("json") => serde_json::from_str(&content).map_err(ConfigError::Json)?,
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };

    validate_route(&config).map_err(ConfigError::Validation)?;

    Ok(config.normalized())
}

/// Load every route file directly inside `dir`, sorted by path.
///
/// A file that fails to load is reported in place so the others still load.
pub fn read_all_route_configs(
    dir: &Path,
) -> Result<Vec<(PathBuf, Result<RouteConfig, ConfigError>)>, ConfigError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(ConfigError::Io)? {
        let path = entry.map_err(ConfigError::Io)?.path();
        if path.is_file() && is_route_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|path| {
            let config = load_route_config(&path);
            (path, config)
        })
        .collect())
}
