//! Sound sources
//!
//! A sound source is a sequential, seekable reader of interleaved 16-bit
//! frames. Both stream backends read through this trait, so a stream can be
//! fed from a WAV file (`hound`), any other container symphonia understands,
//! or an in-memory buffer.

mod decoded;
mod memory;
mod wav;

use std::path::{Path, PathBuf};

use crate::error::{StreamError, StreamResult};
use crate::types::Sample;

pub use decoded::DecodedSource;
pub use memory::{MemorySamples, MemorySource};
pub use wav::WavSource;

/// Static properties of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    /// Interleaved channel count
    pub channels: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Total frames in the source
    pub frames: u64,
}

/// Sequential reader of interleaved full-scale frames
pub trait SoundSource: Send {
    fn info(&self) -> SourceInfo;

    /// Position the reader so the next read starts at `frame`
    fn seek(&mut self, frame: u64) -> StreamResult<()>;

    /// Append up to `max_frames` interleaved frames to `buf`
    ///
    /// Returns the number of frames appended; 0 means end of stream.
    fn read_frames(&mut self, buf: &mut Vec<Sample>, max_frames: usize) -> StreamResult<usize>;
}

/// Where a source came from, so it can be opened again later
#[derive(Debug, Clone)]
pub enum SourceOrigin {
    File(PathBuf),
    Memory(MemorySamples),
}

impl SourceOrigin {
    /// Open a fresh reader positioned at frame 0
    pub fn open(&self) -> StreamResult<Box<dyn SoundSource>> {
        match self {
            SourceOrigin::File(path) => open_source(path),
            SourceOrigin::Memory(samples) => Ok(Box::new(MemorySource::new(samples.clone()))),
        }
    }
}

/// Open a sound file
///
/// WAV files are read with `hound`; anything that is not RIFF/WAVE is handed
/// to symphonia's format probe.
pub fn open_source<P: AsRef<Path>>(path: P) -> StreamResult<Box<dyn SoundSource>> {
    let path = path.as_ref();

    match WavSource::open(path) {
        Ok(source) => {
            log::debug!("open_source: {:?} opened as WAV", path);
            return Ok(Box::new(source));
        }
        Err(WavOpenError::NotWav) => {}
        Err(WavOpenError::Failed(e)) => return Err(e),
    }

    let source = DecodedSource::open(path)?;
    log::debug!("open_source: {:?} opened through symphonia", path);
    Ok(Box::new(source))
}

/// Outcome of trying the WAV reader first
pub(crate) enum WavOpenError {
    /// Not a RIFF/WAVE file; another decoder may handle it
    NotWav,
    /// A WAV file that could not be used
    Failed(StreamError),
}

/// Read exactly `frames` frames starting at `beginning`
///
/// Fails with `StreamError::Read` if the source ends early.
pub fn read_range(
    source: &mut dyn SoundSource,
    beginning: u64,
    frames: u64,
    block_frames: usize,
) -> StreamResult<Vec<Sample>> {
    let channels = source.info().channels;
    let total = usize::try_from(frames)
        .map_err(|_| StreamError::Read(format!("range of {} frames too large", frames)))?;
    let mut data = Vec::with_capacity(total * channels);

    source.seek(beginning)?;
    let mut remaining = total;
    while remaining > 0 {
        let read = source.read_frames(&mut data, remaining.min(block_frames.max(1)))?;
        if read == 0 {
            return Err(StreamError::Read(format!(
                "source ended after {} of {} frames",
                total - remaining,
                total
            )));
        }
        remaining -= read.min(remaining);
    }
    data.truncate(total * channels);

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::write_wav;

    #[test]
    fn test_open_missing_file() {
        let result = open_source("/nonexistent/sfview/missing.wav");
        assert!(matches!(result, Err(StreamError::SourceOpen(_))));
    }

    #[test]
    fn test_open_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, b"this is not a sound file at all, not even close").unwrap();
        let result = open_source(&path);
        assert!(matches!(result, Err(StreamError::SourceOpen(_))));
    }

    #[test]
    fn test_read_range_from_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let frames: Vec<Vec<i16>> = (0..100).map(|i| vec![i as i16, -(i as i16)]).collect();
        write_wav(&path, 2, &frames);

        let mut source = open_source(&path).unwrap();
        assert_eq!(
            source.info(),
            SourceInfo {
                channels: 2,
                sample_rate: 44100,
                frames: 100
            }
        );

        let data = read_range(source.as_mut(), 10, 5, 2).unwrap();
        assert_eq!(data, vec![10, -10, 11, -11, 12, -12, 13, -13, 14, -14]);
    }

    #[test]
    fn test_read_range_past_end_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        let frames: Vec<Vec<i16>> = (0..10).map(|i| vec![i as i16]).collect();
        write_wav(&path, 1, &frames);

        let mut source = open_source(&path).unwrap();
        let result = read_range(source.as_mut(), 5, 10, 4);
        assert!(matches!(result, Err(StreamError::Read(_))));
    }

    #[test]
    fn test_memory_origin_reopens() {
        let samples = MemorySamples::from_normalized(&[0.0, 0.5, -0.5, 1.0], 1, 8000).unwrap();
        let origin = SourceOrigin::Memory(samples);
        let mut source = origin.open().unwrap();
        let data = read_range(source.as_mut(), 1, 2, 16).unwrap();
        assert_eq!(data, vec![16384, -16384]);
    }
}
