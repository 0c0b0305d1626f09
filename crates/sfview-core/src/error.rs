//! Sound stream error types

use thiserror::Error;

/// Errors that can occur while opening, loading or querying sound streams
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// File missing, unreadable, or not a supported sound format
    #[error("Failed to open sound source: {0}")]
    SourceOpen(String),

    /// Reading samples from an opened source failed
    #[error("Failed to read sound source: {0}")]
    Read(String),

    /// Channel index outside the stream's channel count
    #[error("Channel {channel} out of range (stream has {channels} channels)")]
    InvalidChannel { channel: usize, channels: usize },

    /// Requested frame window not inside the stream
    #[error("Frames {offset}+{duration} outside stream range {beginning}+{available}")]
    OutOfRange {
        offset: f64,
        duration: f64,
        beginning: u64,
        available: u64,
    },

    /// Operation not allowed in the current load state
    #[error("Cannot {operation} while cache is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// The cache build finished in the Failed state
    #[error("Cache load failed: {0}")]
    LoadFailed(String),

    /// The background loader thread could not be started
    #[error("Failed to spawn cache loader thread: {0}")]
    LoaderSpawn(String),

    /// Caller-supplied sample data is malformed
    #[error("Invalid sample data: {0}")]
    InvalidData(String),
}

impl StreamError {
    /// True for the range-error kind (bad channel or window)
    pub fn is_range_error(&self) -> bool {
        matches!(
            self,
            StreamError::InvalidChannel { .. } | StreamError::OutOfRange { .. }
        )
    }

    /// True for the state-error kind
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            StreamError::InvalidState { .. } | StreamError::LoadFailed(_)
        )
    }
}

/// Result type for sound stream operations
pub type StreamResult<T> = Result<T, StreamError>;
