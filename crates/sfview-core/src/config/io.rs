//! Cache config file I/O
//!
//! The cache config lives in a small YAML file. Loading never fails: a
//! missing, unreadable or malformed file falls back to the defaults, and
//! bounds that would stall a build are raised before the config is handed out.

use anyhow::{Context, Result};
use std::path::Path;

use super::CacheConfig;

/// Load the cache config from `path`
///
/// Falls back to `CacheConfig::default()` when the file is missing or
/// broken (logging why). The result is always validated.
pub fn load_config(path: &Path) -> CacheConfig {
    let config = match read_config(path) {
        Ok(Some(config)) => {
            log::info!("load_config: Loaded cache config from {:?}", path);
            config
        }
        Ok(None) => {
            log::info!("load_config: {:?} doesn't exist, using defaults", path);
            CacheConfig::default()
        }
        Err(e) => {
            log::warn!("load_config: {:#}, using defaults", e);
            CacheConfig::default()
        }
    };
    sanitize(config)
}

/// Parse the config file, `None` if it doesn't exist
fn read_config(path: &Path) -> Result<Option<CacheConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let config = serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(Some(config))
}

/// Raise zero bounds, naming each one that was rejected
fn sanitize(config: CacheConfig) -> CacheConfig {
    let validated = config.validated();
    if validated.max_units != config.max_units {
        log::warn!(
            "load_config: max_units {} rejected, using {}",
            config.max_units,
            validated.max_units
        );
    }
    if validated.read_block_frames != config.read_block_frames {
        log::warn!(
            "load_config: read_block_frames {} rejected, using {}",
            config.read_block_frames,
            validated.read_block_frames
        );
    }
    validated
}

/// Save the cache config to `path`, creating parent directories
///
/// The validated form is written, so the file always loads back unchanged.
pub fn save_config(config: &CacheConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(&config.validated()).context("Failed to serialize cache config")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Saved cache config to {:?}", path);
    Ok(())
}
