//! In-memory sample source

use std::sync::Arc;

use super::{SoundSource, SourceInfo};
use crate::error::{StreamError, StreamResult};
use crate::types::{sample_from_normalized, Sample};

/// Interleaved full-scale samples shared between a source and its origin
#[derive(Debug, Clone)]
pub struct MemorySamples {
    data: Arc<[Sample]>,
    channels: usize,
    sample_rate: u32,
}

impl MemorySamples {
    /// Wrap interleaved full-scale samples
    pub fn new(data: Vec<Sample>, channels: usize, sample_rate: u32) -> StreamResult<Self> {
        if channels == 0 {
            return Err(StreamError::InvalidData("channel count must be at least 1".into()));
        }
        if data.len() % channels != 0 {
            return Err(StreamError::InvalidData(format!(
                "{} samples is not a whole number of {}-channel frames",
                data.len(),
                channels
            )));
        }
        Ok(Self {
            data: data.into(),
            channels,
            sample_rate,
        })
    }

    /// Convert normalized (-1.0..=1.0) interleaved samples to full scale
    pub fn from_normalized(data: &[f64], channels: usize, sample_rate: u32) -> StreamResult<Self> {
        let samples = data.iter().map(|&v| sample_from_normalized(v)).collect();
        Self::new(samples, channels, sample_rate)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        (self.data.len() / self.channels) as u64
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.data
    }
}

/// Reader over `MemorySamples`
#[derive(Debug, Clone)]
pub struct MemorySource {
    samples: MemorySamples,
    position: u64,
}

impl MemorySource {
    pub fn new(samples: MemorySamples) -> Self {
        Self {
            samples,
            position: 0,
        }
    }
}

impl SoundSource for MemorySource {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            channels: self.samples.channels(),
            sample_rate: self.samples.sample_rate(),
            frames: self.samples.frames(),
        }
    }

    fn seek(&mut self, frame: u64) -> StreamResult<()> {
        if frame > self.samples.frames() {
            return Err(StreamError::Read(format!(
                "seek to frame {} past end of {} frames",
                frame,
                self.samples.frames()
            )));
        }
        self.position = frame;
        Ok(())
    }

    fn read_frames(&mut self, buf: &mut Vec<Sample>, max_frames: usize) -> StreamResult<usize> {
        let remaining = self.samples.frames() - self.position;
        let take = (max_frames as u64).min(remaining) as usize;
        let channels = self.samples.channels();
        let start = self.position as usize * channels;
        buf.extend_from_slice(&self.samples.as_slice()[start..start + take * channels]);
        self.position += take as u64;
        Ok(take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_layout() {
        assert!(matches!(
            MemorySamples::new(vec![1, 2, 3], 2, 44100),
            Err(StreamError::InvalidData(_))
        ));
        assert!(matches!(
            MemorySamples::new(vec![1, 2], 0, 44100),
            Err(StreamError::InvalidData(_))
        ));
    }

    #[test]
    fn test_reads_in_blocks() {
        let samples = MemorySamples::new((0..10).collect(), 2, 44100).unwrap();
        let mut source = MemorySource::new(samples);
        assert_eq!(source.info().frames, 5);

        let mut buf = Vec::new();
        assert_eq!(source.read_frames(&mut buf, 2).unwrap(), 2);
        assert_eq!(source.read_frames(&mut buf, 10).unwrap(), 3);
        assert_eq!(source.read_frames(&mut buf, 10).unwrap(), 0);
        assert_eq!(buf, (0..10).collect::<Vec<i16>>());

        source.seek(4).unwrap();
        buf.clear();
        source.read_frames(&mut buf, 1).unwrap();
        assert_eq!(buf, vec![8, 9]);
        assert!(source.seek(6).is_err());
    }
}
