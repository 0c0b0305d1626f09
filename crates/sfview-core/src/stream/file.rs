//! Direct streaming backend
//!
//! Keeps the requested range of the source as raw interleaved frames and
//! integrates them on every display query. No precomputation, so it suits
//! short ranges or data that has not been cached yet.

use std::path::Path;

use super::{check_channel, integrate_raw, raw_range, ColumnLayout, DisplayData, RawFrames, SoundStream};
use crate::error::StreamResult;
use crate::source::{open_source, read_range, MemorySamples, SoundSource};
use crate::types::{Sample, StreamInfo, SummaryUnit};

/// Frames requested from the source per read while filling the buffer
const READ_BLOCK_FRAMES: usize = 8192;

/// Sound stream backed by raw interleaved frames in memory
#[derive(Debug, Clone)]
pub struct SoundFileStream {
    info: StreamInfo,
    data: Vec<Sample>,
}

impl SoundFileStream {
    /// Read a whole sound file
    pub fn open<P: AsRef<Path>>(path: P) -> StreamResult<Self> {
        let mut source = open_source(path)?;
        let frames = source.info().frames;
        Self::from_source(source.as_mut(), 0, frames)
    }

    /// Read `duration` frames of a sound file starting at `beginning`
    pub fn open_range<P: AsRef<Path>>(path: P, beginning: u64, duration: u64) -> StreamResult<Self> {
        let mut source = open_source(path)?;
        Self::from_source(source.as_mut(), beginning, duration)
    }

    /// Read a frame range from an already opened source
    pub fn from_source(source: &mut dyn SoundSource, beginning: u64, duration: u64) -> StreamResult<Self> {
        let source_info = source.info();
        let info = StreamInfo::new(source_info.channels, source_info.sample_rate, beginning, duration);
        let whole = StreamInfo::new(source_info.channels, source_info.sample_rate, 0, source_info.frames);
        raw_range(&whole, beginning, duration)?;

        let data = read_range(source, beginning, duration, READ_BLOCK_FRAMES)?;
        log::debug!(
            "SoundFileStream: read {} frames x {} channels from frame {}",
            duration,
            info.channels,
            beginning
        );

        Ok(Self { info, data })
    }

    /// Wrap normalized interleaved samples; `beginning` labels the first frame
    pub fn from_samples(data: &[f64], channels: usize, sample_rate: u32, beginning: u64) -> StreamResult<Self> {
        let samples = MemorySamples::from_normalized(data, channels, sample_rate)?;
        let info = StreamInfo::new(channels, sample_rate, beginning, samples.frames());
        Ok(Self {
            info,
            data: samples.as_slice().to_vec(),
        })
    }

    /// All frames of `channel` as a strided view
    fn channel_frames(&self, channel: usize) -> RawFrames<'_> {
        RawFrames::strided(&self.data, channel, self.info.channels, self.info.duration as usize)
    }

    /// Per-column statistics over the window `[offset, offset + duration)`
    pub fn integrate(
        &self,
        channel: usize,
        offset: f64,
        duration: f64,
        columns: usize,
    ) -> StreamResult<Vec<SummaryUnit>> {
        check_channel(&self.info, channel)?;
        let layout = ColumnLayout::new(&self.info, offset, duration, columns)?;
        Ok(integrate_raw(&self.channel_frames(channel), &layout))
    }
}

impl SoundStream for SoundFileStream {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn display_data(
        &self,
        channel: usize,
        offset: f64,
        duration: f64,
        columns: usize,
    ) -> StreamResult<DisplayData> {
        let units = self.integrate(channel, offset, duration, columns)?;
        Ok(DisplayData::from_units(&units))
    }

    fn raw_frames(&self, channel: usize, beginning: u64, duration: u64) -> StreamResult<RawFrames<'_>> {
        check_channel(&self.info, channel)?;
        let range = raw_range(&self.info, beginning, duration)?;
        let channels = self.info.channels;
        Ok(RawFrames::strided(
            &self.data,
            range.start * channels + channel,
            channels,
            range.len(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::test_util::{sine, write_wav};

    #[test]
    fn test_open_range_and_raw_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let frames: Vec<Vec<i16>> = (0..200).map(|i| vec![i as i16, -(i as i16)]).collect();
        write_wav(&path, 2, &frames);

        let stream = SoundFileStream::open_range(&path, 50, 100).unwrap();
        assert_eq!(stream.channels(), 2);
        assert_eq!(stream.beginning(), 50);
        assert_eq!(stream.duration(), 100);

        let right = stream.raw_frames(1, 60, 3).unwrap();
        assert!(right.is_interleaved());
        assert_eq!(right.to_vec(), vec![-60, -61, -62]);

        assert!(stream.raw_frames(0, 49, 2).unwrap_err().is_range_error());
        assert!(stream.raw_frames(0, 149, 2).unwrap_err().is_range_error());
        assert!(matches!(
            stream.raw_frames(2, 60, 1),
            Err(StreamError::InvalidChannel { channel: 2, channels: 2 })
        ));
    }

    #[test]
    fn test_open_range_outside_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let frames: Vec<Vec<i16>> = (0..10).map(|i| vec![i as i16]).collect();
        write_wav(&path, 1, &frames);

        let result = SoundFileStream::open_range(&path, 5, 10);
        assert!(result.unwrap_err().is_range_error());
    }

    #[test]
    fn test_envelope_bounds_every_sample() {
        let samples = sine(2, 3000, 0.8);
        let stream = SoundFileStream::from_samples(&samples, 2, 44100, 0).unwrap();

        for channel in 0..2 {
            let data = stream.display_data(channel, 0.0, 3000.0, 64).unwrap();
            let layout = ColumnLayout::new(&stream.info, 0.0, 3000.0, 64).unwrap();
            let raw = stream.raw_frames(channel, 0, 3000).unwrap();
            for column in 0..64 {
                let span = layout.span(column);
                for frame in span.start..span.end {
                    let sample = raw.get(frame as usize).unwrap();
                    assert!(data.min[column] <= sample && sample <= data.max[column]);
                }
                assert!(data.min[column] <= data.min_rms[column]);
                assert!(data.min_rms[column] <= data.max_rms[column]);
                assert!(data.max_rms[column] <= data.max[column]);
            }
        }
    }

    #[test]
    fn test_sub_frame_columns_use_nearest_sample() {
        let stream = SoundFileStream::from_samples(&[0.0, 0.5, -0.5, 1.0], 1, 44100, 10).unwrap();
        let data = stream.display_data(0, 10.0, 4.0, 8).unwrap();
        assert_eq!(data.min, vec![0, 0, 16384, 16384, -16384, -16384, 32767, 32767]);
        assert_eq!(data.min, data.max);
    }

    #[test]
    fn test_display_rejects_bad_window() {
        let stream = SoundFileStream::from_samples(&[0.1; 100], 1, 44100, 0).unwrap();
        assert!(stream.display_data(0, 50.0, 60.0, 10).unwrap_err().is_range_error());
        assert!(stream.display_data(1, 0.0, 10.0, 10).unwrap_err().is_range_error());
        assert!(stream.display_data(0, 0.0, 100.0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_integrate_sums() {
        let stream = SoundFileStream::from_samples(&[0.5, 0.5, -0.5, -0.5], 1, 44100, 0).unwrap();
        let units = stream.integrate(0, 0.0, 4.0, 2).unwrap();
        assert_eq!(units[0].sum, 2.0 * 16384.0);
        assert_eq!(units[1].sum, -2.0 * 16384.0);
        assert_eq!(units[0].frames + units[1].frames, 4);
    }
}
