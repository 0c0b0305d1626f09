//! Sound streams
//!
//! A `SoundStream` exposes a fixed range of a multi-channel source for
//! waveform display. Two backends implement it:
//!
//! - [`SoundFileStream`]: keeps the raw interleaved frames and integrates
//!   them on every display query.
//! - [`SoundCacheStream`]: builds a summary cache once on a background
//!   thread and answers display queries by merging cached units.
//!
//! Display queries take a fractional frame window and a column count and
//! return one envelope column per output pixel.

mod cache;
mod file;
mod loader;

use std::borrow::Cow;
use std::ops::Range;

use crate::error::{StreamError, StreamResult};
use crate::types::{Sample, StreamInfo, SummaryUnit};

pub use cache::{CacheEvent, LoadState, SoundCacheStream};
pub use file::SoundFileStream;
pub use loader::{frames_per_unit, BuildPlan, CacheMode};

/// Waveform display columns for one channel
///
/// All four buffers have the same length (the requested column count).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayData {
    /// Lower envelope per column
    pub min: Vec<Sample>,
    /// Upper envelope per column
    pub max: Vec<Sample>,
    /// Lower edge of the RMS band per column
    pub min_rms: Vec<Sample>,
    /// Upper edge of the RMS band per column
    pub max_rms: Vec<Sample>,
}

impl DisplayData {
    pub fn with_capacity(columns: usize) -> Self {
        Self {
            min: Vec::with_capacity(columns),
            max: Vec::with_capacity(columns),
            min_rms: Vec::with_capacity(columns),
            max_rms: Vec::with_capacity(columns),
        }
    }

    /// Build display columns from per-column summaries
    pub fn from_units(units: &[SummaryUnit]) -> Self {
        let mut data = Self::with_capacity(units.len());
        for unit in units {
            data.push(unit);
        }
        data
    }

    pub fn push(&mut self, unit: &SummaryUnit) {
        let (min_rms, max_rms) = unit.rms_band();
        if unit.is_empty() {
            self.min.push(0);
            self.max.push(0);
        } else {
            self.min.push(unit.min);
            self.max.push(unit.max);
        }
        self.min_rms.push(min_rms);
        self.max_rms.push(max_rms);
    }

    pub fn len(&self) -> usize {
        self.min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.min.is_empty()
    }
}

/// Raw samples of one channel over a frame range
///
/// Either a strided view into a stream's interleaved storage, or an owned
/// buffer when the frames had to be read from the source again.
#[derive(Debug, Clone)]
pub struct RawFrames<'a> {
    samples: Cow<'a, [Sample]>,
    first: usize,
    stride: usize,
    len: usize,
}

impl<'a> RawFrames<'a> {
    /// View `len` samples starting at `first`, `stride` apart
    pub(crate) fn strided(samples: &'a [Sample], first: usize, stride: usize, len: usize) -> Self {
        Self {
            samples: Cow::Borrowed(samples),
            first,
            stride: stride.max(1),
            len,
        }
    }

    /// Contiguous owned samples
    pub(crate) fn owned(samples: Vec<Sample>) -> RawFrames<'static> {
        let len = samples.len();
        RawFrames {
            samples: Cow::Owned(samples),
            first: 0,
            stride: 1,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when consecutive frames are not adjacent in memory
    pub fn is_interleaved(&self) -> bool {
        self.stride > 1
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<Sample> {
        if index >= self.len {
            return None;
        }
        self.samples.get(self.first + index * self.stride).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        self.samples
            .get(self.first..)
            .unwrap_or(&[])
            .iter()
            .step_by(self.stride)
            .take(self.len)
            .copied()
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.iter().collect()
    }

    /// Summary over all frames in the view
    pub fn summarize(&self) -> SummaryUnit {
        let mut unit = SummaryUnit::EMPTY;
        for sample in self.iter() {
            unit.accumulate(sample);
        }
        unit
    }
}

/// Common interface of the direct and cached backends
pub trait SoundStream {
    /// Stream geometry
    fn info(&self) -> StreamInfo;

    fn channels(&self) -> usize {
        self.info().channels
    }

    /// First source frame covered by the stream
    fn beginning(&self) -> u64 {
        self.info().beginning
    }

    /// Number of frames covered by the stream
    fn duration(&self) -> u64 {
        self.info().duration
    }

    /// Envelope columns for `channel` over the window `[offset, offset + duration)`
    ///
    /// `offset` is an absolute source frame position and may be fractional.
    fn display_data(
        &self,
        channel: usize,
        offset: f64,
        duration: f64,
        columns: usize,
    ) -> StreamResult<DisplayData>;

    /// Raw samples of `channel` for the absolute frames `[beginning, beginning + duration)`
    fn raw_frames(&self, channel: usize, beginning: u64, duration: u64) -> StreamResult<RawFrames<'_>>;
}

/// Check a channel index against the stream geometry
pub(crate) fn check_channel(info: &StreamInfo, channel: usize) -> StreamResult<()> {
    if channel >= info.channels {
        return Err(StreamError::InvalidChannel {
            channel,
            channels: info.channels,
        });
    }
    Ok(())
}

/// Validate a raw frame request, returning the range relative to the stream start
pub(crate) fn raw_range(info: &StreamInfo, beginning: u64, duration: u64) -> StreamResult<Range<usize>> {
    let end = beginning.checked_add(duration);
    match end {
        Some(end) if beginning >= info.beginning && end <= info.end() => {
            let start = (beginning - info.beginning) as usize;
            Ok(start..start + duration as usize)
        }
        _ => Err(StreamError::OutOfRange {
            offset: beginning as f64,
            duration: duration as f64,
            beginning: info.beginning,
            available: info.duration,
        }),
    }
}

/// Slack allowed when a fractional window touches the stream edges
const WINDOW_EPSILON: f64 = 1e-6;

/// Mapping of display columns onto stream frames
///
/// Column `i` spans `[start + i*d/N, start + (i+1)*d/N)` in stream-relative
/// frames. Columns at least one frame wide cover `floor(a)..floor(b)`;
/// narrower columns sample the single frame nearest their centre. Either
/// way the columns never overlap.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnLayout {
    start: f64,
    duration: f64,
    columns: usize,
    limit: u64,
}

impl ColumnLayout {
    pub(crate) fn new(info: &StreamInfo, offset: f64, duration: f64, columns: usize) -> StreamResult<Self> {
        let start = offset - info.beginning as f64;
        let valid = offset.is_finite()
            && duration.is_finite()
            && duration > 0.0
            && start >= -WINDOW_EPSILON
            && start + duration <= info.duration as f64 + WINDOW_EPSILON;
        if !valid {
            return Err(StreamError::OutOfRange {
                offset,
                duration,
                beginning: info.beginning,
                available: info.duration,
            });
        }

        Ok(Self {
            start: start.max(0.0),
            duration,
            columns,
            limit: info.duration,
        })
    }

    pub(crate) fn columns(&self) -> usize {
        self.columns
    }

    /// Stream-relative frames covered by `column`, never empty
    pub(crate) fn span(&self, column: usize) -> Range<u64> {
        let n = self.columns as f64;
        let a = self.start + self.duration * column as f64 / n;
        let b = self.start + self.duration * (column + 1) as f64 / n;
        let last = self.limit.saturating_sub(1);

        if b - a < 1.0 {
            let frame = (((a + b) * 0.5).floor() as u64).min(last);
            return frame..frame + 1;
        }

        let lo = (a.floor() as u64).min(last);
        let hi = (b.floor() as u64).clamp(lo + 1, self.limit);
        lo..hi
    }
}

/// Summaries per column computed straight from raw frames
pub(crate) fn integrate_raw(frames: &RawFrames<'_>, layout: &ColumnLayout) -> Vec<SummaryUnit> {
    (0..layout.columns())
        .map(|column| {
            let span = layout.span(column);
            let mut unit = SummaryUnit::EMPTY;
            for index in span.start as usize..span.end as usize {
                if let Some(sample) = frames.get(index) {
                    unit.accumulate(sample);
                }
            }
            unit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(duration: u64) -> StreamInfo {
        StreamInfo::new(1, 44100, 1000, duration)
    }

    #[test]
    fn test_layout_partitions_window() {
        let layout = ColumnLayout::new(&info(500), 1000.0, 500.0, 100).unwrap();
        for column in 0..100u64 {
            assert_eq!(layout.span(column as usize), column * 5..column * 5 + 5);
        }
    }

    #[test]
    fn test_layout_fractional_columns_are_contiguous() {
        let layout = ColumnLayout::new(&info(1000), 1003.25, 37.5, 25).unwrap();
        let mut expected_start = 3;
        for column in 0..25 {
            let span = layout.span(column);
            assert_eq!(span.start, expected_start);
            assert!(span.end > span.start);
            expected_start = span.end;
        }
        assert_eq!(expected_start, 40);
    }

    #[test]
    fn test_layout_sub_frame_columns_pick_nearest_frame() {
        // 4 frames over 16 columns: each frame repeated 4 times
        let layout = ColumnLayout::new(&info(10), 1002.0, 4.0, 16).unwrap();
        let frames: Vec<u64> = (0..16).map(|c| layout.span(c).start).collect();
        assert_eq!(frames, vec![2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5]);
        assert!((0..16).all(|c| layout.span(c).end - layout.span(c).start == 1));
    }

    #[test]
    fn test_layout_rejects_out_of_range() {
        assert!(ColumnLayout::new(&info(100), 999.0, 10.0, 4).is_err());
        assert!(ColumnLayout::new(&info(100), 1050.0, 51.0, 4).is_err());
        assert!(ColumnLayout::new(&info(100), 1000.0, 0.0, 4).is_err());
        assert!(ColumnLayout::new(&info(100), f64::NAN, 10.0, 4).is_err());
        assert!(ColumnLayout::new(&info(100), 1000.0, 100.0, 4).is_ok());
    }

    #[test]
    fn test_raw_frames_views() {
        let interleaved: Vec<Sample> = vec![1, 10, 2, 20, 3, 30, 4, 40];
        let right = RawFrames::strided(&interleaved, 1, 2, 3);
        assert!(right.is_interleaved());
        assert_eq!(right.to_vec(), vec![10, 20, 30]);
        assert_eq!(right.get(3), None);

        let owned = RawFrames::owned(vec![5, -5, 7]);
        assert!(!owned.is_interleaved());
        let unit = owned.summarize();
        assert_eq!((unit.min, unit.max, unit.frames), (-5, 7, 3));
    }

    #[test]
    fn test_raw_range_bounds() {
        let info = info(100);
        assert_eq!(raw_range(&info, 1010, 5).unwrap(), 10..15);
        assert_eq!(raw_range(&info, 1000, 100).unwrap(), 0..100);
        assert!(raw_range(&info, 999, 5).unwrap_err().is_range_error());
        assert!(raw_range(&info, 1096, 5).unwrap_err().is_range_error());
    }

    #[test]
    fn test_display_data_from_units() {
        let mut unit = SummaryUnit::EMPTY;
        for s in [-300, 400] {
            unit.accumulate(s);
        }
        let data = DisplayData::from_units(&[unit, SummaryUnit::EMPTY]);
        assert_eq!(data.min, vec![-300, 0]);
        assert_eq!(data.max, vec![400, 0]);
        assert_eq!(data.min_rms, vec![-300, 0]);
        assert_eq!(data.max_rms, vec![354, 0]);
    }
}
