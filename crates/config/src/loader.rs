use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::EtmConfig,
    validate::{ValidationResult, build_config, validate_value},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["etm.yaml", "etm.yml", "etm.toml", "etm.json"];

const APP_NAME: &str = "etm";

/// Database file name inside the data directory.
pub const DATABASE_FILENAME: &str = "tgdata.db";

/// Load and validate config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<EtmConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    let doc = parse_config_value(&raw, path)?;
    build_config(&doc, Some(path.to_path_buf()))
}

/// Validate the config file at `path` and report every diagnostic, warnings
/// included, without building the config.
pub fn validate_file(path: &Path) -> Result<ValidationResult> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = parse_config_value(&substitute_env(&raw), path)?;
    let mut result = validate_value(&doc);
    result.config_path = Some(path.to_path_buf());
    Ok(result)
}

/// Load config from `explicit` when given, otherwise from the first file
/// found in the standard locations.
///
/// Search order:
/// 1. `./etm.{yaml,yml,toml,json}`
/// 2. `<user config dir>/etm/etm.{yaml,yml,toml,json}`
///
/// Unlike most settings, there is no usable default: a missing file is an
/// error.
pub fn discover_and_load(explicit: Option<&Path>) -> Result<EtmConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => find_config_file().ok_or(Error::NotFound)?,
    };
    debug!(path = %path.display(), "loading config");
    load_config(&path)
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .or_else(|| {
            let dir = config_dir()?;
            CONFIG_FILENAMES
                .iter()
                .map(|name| dir.join(name))
                .find(|p| p.exists())
        })
}

/// Returns the user-global config directory (`~/.config/etm/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|d| d.config_dir().to_path_buf())
}

/// Directory holding the database, created if missing.
pub fn resolve_data_dir(config: &EtmConfig) -> Result<PathBuf> {
    let dir = match &config.data_dir {
        Some(dir) => dir.clone(),
        None => directories::ProjectDirs::from("", "", APP_NAME)
            .map(|d| d.data_dir().to_path_buf())
            .context("cannot determine a data directory; set data_dir in the config")?,
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;
    Ok(dir)
}

fn parse_config_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("yaml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw).map_err(|e| Error::parse(path, e))?;
            serde_json::to_value(v).map_err(|e| Error::parse(path, e))
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e))?;
            serde_json::to_value(v).map_err(|e| Error::parse(path, e))
        },
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}
