//! sfview-core - Waveform summaries for sound file display
//!
//! A [`SoundStream`] exposes a range of a multi-channel sound source and
//! answers "what does this window look like at N pixels wide" queries with
//! per-column min/max/RMS envelopes. The direct backend integrates raw frames
//! on every query; the cached backend builds a downsampled summary on a
//! background thread and answers from it.

pub mod config;
pub mod error;
pub mod source;
pub mod stream;
pub mod types;

pub use error::{StreamError, StreamResult};
pub use stream::{
    CacheEvent, CacheMode, DisplayData, LoadState, RawFrames, SoundCacheStream, SoundFileStream,
    SoundStream,
};
pub use types::{Sample, StreamInfo, SummaryUnit};

#[cfg(test)]
pub(crate) mod test_util {
    use std::f64::consts::TAU;
    use std::path::Path;

    /// Write a 16-bit 44.1kHz WAV file, one inner vec per frame
    pub fn write_wav(path: &Path, channels: u16, frames: &[Vec<i16>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for &sample in frame {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    /// Interleaved normalized sine, each channel a different partial
    pub fn sine(channels: usize, frames: usize, amplitude: f64) -> Vec<f64> {
        (0..frames)
            .flat_map(|frame| {
                (0..channels).map(move |channel| {
                    let cycles = (channel + 1) as f64 * frame as f64 / 441.0;
                    amplitude * (TAU * cycles).sin()
                })
            })
            .collect()
    }
}
