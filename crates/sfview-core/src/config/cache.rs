//! Summary cache sizing

use serde::{Deserialize, Serialize};

/// Bounds for building a summary cache
///
/// A range of at most `max_raw_frames` frames is kept raw. Longer ranges are
/// folded into at most `max_units` summary units per channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum summary units materialized per channel
    /// Default: 65536
    pub max_units: u64,

    /// Longest range (in frames) kept as raw samples instead of summarized
    /// Default: 300000 (a bit under 7 seconds at 44.1kHz)
    pub max_raw_frames: u64,

    /// Frames requested from the source per read during a build
    /// Default: 8192
    pub read_block_frames: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_units: 65_536,
            max_raw_frames: 300_000,
            read_block_frames: 8192,
        }
    }
}

impl CacheConfig {
    /// Copy with zero-valued bounds raised to 1
    pub fn validated(&self) -> Self {
        Self {
            max_units: self.max_units.max(1),
            max_raw_frames: self.max_raw_frames,
            read_block_frames: self.read_block_frames.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_floors_bounds() {
        let config = CacheConfig {
            max_units: 0,
            max_raw_frames: 0,
            read_block_frames: 0,
        }
        .validated();
        assert_eq!(config.max_units, 1);
        assert_eq!(config.max_raw_frames, 0);
        assert_eq!(config.read_block_frames, 1);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: CacheConfig = serde_yaml::from_str("max_units: 1000\n").unwrap();
        assert_eq!(config.max_units, 1000);
        assert_eq!(config.max_raw_frames, CacheConfig::default().max_raw_frames);
    }
}
