//! Configuration for sfview
//!
//! - YAML loading/saving of the cache config (validated on load)
//! - Default config locations
//! - Cache sizing bounds
//!
//! # Usage
//!
//! ```ignore
//! use sfview_core::config::{default_config_path, load_config, CacheConfig};
//!
//! let config: CacheConfig = load_config(&default_config_path("cache.yaml"));
//! ```

mod cache;
mod io;
mod paths;

pub use cache::CacheConfig;
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
