//! Standard locations for sfview configuration files

use std::path::PathBuf;

/// Directory holding sfview configuration
///
/// Returns `<platform config dir>/sfview`, or `./sfview` when the platform
/// has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sfview")
}

/// Default path of a config file inside [`default_config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
