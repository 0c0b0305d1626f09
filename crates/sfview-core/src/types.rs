//! Common types for sfview
//!
//! Stream geometry, the per-span summary statistics shared by both stream
//! backends, and the conversions between normalized and full-scale samples.

/// Raw sample type (full-scale 16-bit, as read from sound files)
pub type Sample = i16;

/// Convert a normalized sample (-1.0..=1.0) to full scale
///
/// Values outside the normalized range are clamped.
#[inline]
pub fn sample_from_normalized(value: f64) -> Sample {
    (value * i16::MAX as f64)
        .round()
        .clamp(i16::MIN as f64, i16::MAX as f64) as Sample
}

/// Convert a 32-bit float sample to full scale
#[inline]
pub fn sample_from_f32(value: f32) -> Sample {
    sample_from_normalized(value as f64)
}

/// Rescale an integer PCM sample of the given bit depth to 16 bits
#[inline]
pub fn sample_from_int(value: i32, bits: u16) -> Sample {
    use std::cmp::Ordering;
    match bits.cmp(&16) {
        Ordering::Less => (value << (16 - bits)).clamp(i16::MIN as i32, i16::MAX as i32) as Sample,
        Ordering::Equal => value.clamp(i16::MIN as i32, i16::MAX as i32) as Sample,
        Ordering::Greater => (value >> (bits - 16)) as Sample,
    }
}

/// Round and clamp an `f64` to the sample range
#[inline]
fn saturate(value: f64) -> Sample {
    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as Sample
}

/// Geometry of a sound stream
///
/// `beginning` and `duration` are in frames and describe the range of the
/// underlying source that the stream exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamInfo {
    /// Interleaved channel count
    pub channels: usize,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// First source frame covered by the stream
    pub beginning: u64,
    /// Number of frames covered
    pub duration: u64,
}

impl StreamInfo {
    pub fn new(channels: usize, sample_rate: u32, beginning: u64, duration: u64) -> Self {
        Self {
            channels,
            sample_rate,
            beginning,
            duration,
        }
    }

    /// One past the last covered frame
    pub fn end(&self) -> u64 {
        self.beginning + self.duration
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.duration as f64 / self.sample_rate as f64
    }
}

/// Summary statistics over a contiguous run of frames of one channel
///
/// Used both as the cache's summary unit and as the per-column result of
/// integrating raw frames. Units merge analytically, so any run of adjacent
/// units can be reduced to one without touching raw samples again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryUnit {
    /// Smallest sample in the run
    pub min: Sample,
    /// Largest sample in the run
    pub max: Sample,
    /// Arithmetic sum of the samples
    pub sum: f64,
    /// Sum of squared samples
    pub sum2: f64,
    /// Number of frames summarized
    pub frames: u64,
}

impl Default for SummaryUnit {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl SummaryUnit {
    /// A unit that has not seen any frames yet
    pub const EMPTY: SummaryUnit = SummaryUnit {
        min: Sample::MAX,
        max: Sample::MIN,
        sum: 0.0,
        sum2: 0.0,
        frames: 0,
    };

    /// Unit covering a single sample
    #[inline]
    pub fn from_sample(sample: Sample) -> Self {
        let value = sample as f64;
        Self {
            min: sample,
            max: sample,
            sum: value,
            sum2: value * value,
            frames: 1,
        }
    }

    /// Fold one more sample into the unit
    #[inline]
    pub fn accumulate(&mut self, sample: Sample) {
        let value = sample as f64;
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.sum += value;
        self.sum2 += value * value;
        self.frames += 1;
    }

    /// Fold another unit into this one
    #[inline]
    pub fn merge(&mut self, other: &SummaryUnit) {
        if other.frames == 0 {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.sum2 += other.sum2;
        self.frames += other.frames;
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Arithmetic mean, 0 for an empty unit
    pub fn mean(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.sum / self.frames as f64
    }

    /// Root-mean-square level, 0 for an empty unit
    pub fn rms(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        (self.sum2 / self.frames as f64).sqrt()
    }

    /// RMS band `(-rms, rms)` clamped into the unit's envelope
    pub fn rms_band(&self) -> (Sample, Sample) {
        if self.frames == 0 {
            return (0, 0);
        }
        let rms = self.rms();
        let low = saturate(-rms).max(self.min);
        let high = saturate(rms).min(self.max);
        (low, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_from_normalized() {
        assert_eq!(sample_from_normalized(0.0), 0);
        assert_eq!(sample_from_normalized(1.0), i16::MAX);
        assert_eq!(sample_from_normalized(-1.0), -i16::MAX);
        assert_eq!(sample_from_normalized(4.0), i16::MAX);
        assert_eq!(sample_from_normalized(-4.0), i16::MIN);
        assert_eq!(sample_from_normalized(0.5), 16384);
    }

    #[test]
    fn test_sample_from_int() {
        // 24-bit full scale maps to 16-bit full scale
        assert_eq!(sample_from_int(0x7F_FFFF, 24), i16::MAX);
        assert_eq!(sample_from_int(-0x80_0000, 24), i16::MIN);
        assert_eq!(sample_from_int(i32::MAX, 32), i16::MAX);
        assert_eq!(sample_from_int(1234, 16), 1234);
        assert_eq!(sample_from_int(-128, 8), i16::MIN);
        assert_eq!(sample_from_int(1, 8), 256);
    }

    #[test]
    fn test_summary_unit_accumulate_and_merge() {
        let mut a = SummaryUnit::EMPTY;
        for s in [3, -4, 5] {
            a.accumulate(s);
        }
        assert_eq!(a.min, -4);
        assert_eq!(a.max, 5);
        assert_eq!(a.sum, 4.0);
        assert_eq!(a.sum2, 50.0);
        assert_eq!(a.frames, 3);

        let mut b = SummaryUnit::from_sample(-10);
        b.merge(&a);
        assert_eq!(b.min, -10);
        assert_eq!(b.max, 5);
        assert_eq!(b.frames, 4);
        assert_eq!(b.sum2, 150.0);

        // Merging an empty unit is a no-op
        let before = b;
        b.merge(&SummaryUnit::EMPTY);
        assert_eq!(b, before);
    }

    #[test]
    fn test_sum2_bounds_mean_square() {
        let mut unit = SummaryUnit::EMPTY;
        for s in [100, -200, 300, 7, -7] {
            unit.accumulate(s);
        }
        assert!(unit.sum2 >= unit.sum * unit.sum / unit.frames as f64);
    }

    #[test]
    fn test_rms_band_clamped_to_envelope() {
        // Constant positive signal: band collapses onto the envelope
        let mut dc = SummaryUnit::EMPTY;
        for _ in 0..10 {
            dc.accumulate(1000);
        }
        assert_eq!(dc.rms_band(), (1000, 1000));

        // Symmetric square wave: band equals amplitude
        let mut square = SummaryUnit::EMPTY;
        for i in 0..10 {
            square.accumulate(if i % 2 == 0 { 500 } else { -500 });
        }
        assert_eq!(square.rms_band(), (-500, 500));

        assert_eq!(SummaryUnit::EMPTY.rms_band(), (0, 0));
    }
}
