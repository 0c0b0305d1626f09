//! WAV reader over `hound`

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use hound::{SampleFormat, WavReader};

use super::{SoundSource, SourceInfo, WavOpenError};
use crate::error::{StreamError, StreamResult};
use crate::types::{sample_from_f32, sample_from_int, Sample};

/// Integer or float PCM WAV file
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    info: SourceInfo,
    bits_per_sample: u16,
    sample_format: SampleFormat,
}

impl WavSource {
    pub(crate) fn open(path: &Path) -> Result<Self, WavOpenError> {
        let reader = match WavReader::open(path) {
            Ok(reader) => reader,
            Err(hound::Error::IoError(e)) => {
                return Err(WavOpenError::Failed(StreamError::SourceOpen(format!(
                    "{}: {}",
                    path.display(),
                    e
                ))))
            }
            Err(e) => {
                log::debug!("WavSource: {:?} not readable as WAV ({})", path, e);
                return Err(WavOpenError::NotWav);
            }
        };

        let spec = reader.spec();
        let supported = match spec.sample_format {
            SampleFormat::Float => spec.bits_per_sample == 32,
            SampleFormat::Int => (1..=32).contains(&spec.bits_per_sample),
        };
        if !supported {
            return Err(WavOpenError::Failed(StreamError::SourceOpen(format!(
                "{}: unsupported {}-bit {:?} samples",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            ))));
        }
        if spec.channels == 0 {
            return Err(WavOpenError::Failed(StreamError::SourceOpen(format!(
                "{}: no channels",
                path.display()
            ))));
        }

        let info = SourceInfo {
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            frames: reader.duration() as u64,
        };

        Ok(Self {
            reader,
            info,
            bits_per_sample: spec.bits_per_sample,
            sample_format: spec.sample_format,
        })
    }
}

fn read_error(e: hound::Error) -> StreamError {
    StreamError::Read(e.to_string())
}

impl SoundSource for WavSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn seek(&mut self, frame: u64) -> StreamResult<()> {
        let frame = u32::try_from(frame)
            .map_err(|_| StreamError::Read(format!("seek position {} beyond WAV limits", frame)))?;
        self.reader
            .seek(frame)
            .map_err(|e| StreamError::Read(e.to_string()))
    }

    fn read_frames(&mut self, buf: &mut Vec<Sample>, max_frames: usize) -> StreamResult<usize> {
        let channels = self.info.channels;
        let wanted = max_frames * channels;
        let start = buf.len();
        let bits = self.bits_per_sample;

        match self.sample_format {
            SampleFormat::Float => {
                for sample in self.reader.samples::<f32>().take(wanted) {
                    buf.push(sample_from_f32(sample.map_err(read_error)?));
                }
            }
            SampleFormat::Int if bits <= 16 => {
                for sample in self.reader.samples::<i16>().take(wanted) {
                    buf.push(sample_from_int(sample.map_err(read_error)? as i32, bits));
                }
            }
            SampleFormat::Int => {
                for sample in self.reader.samples::<i32>().take(wanted) {
                    buf.push(sample_from_int(sample.map_err(read_error)?, bits));
                }
            }
        }

        // Drop a trailing partial frame
        let frames = (buf.len() - start) / channels;
        buf.truncate(start + frames * channels);
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_24bit_and_float() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("deep.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 24,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [0x7F_FFFFi32, -0x80_0000, 256] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = match WavSource::open(&path) {
            Ok(source) => source,
            Err(_) => panic!("24-bit WAV should open"),
        };
        assert_eq!(source.info().sample_rate, 48000);
        let mut buf = Vec::new();
        assert_eq!(source.read_frames(&mut buf, 10).unwrap(), 3);
        assert_eq!(buf, vec![i16::MAX, i16::MIN, 1]);
        assert_eq!(source.read_frames(&mut buf, 10).unwrap(), 0);

        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [0.5f32, -1.0, 2.0, 0.0] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = match WavSource::open(&path) {
            Ok(source) => source,
            Err(_) => panic!("float WAV should open"),
        };
        let mut buf = Vec::new();
        assert_eq!(source.read_frames(&mut buf, 1).unwrap(), 1);
        assert_eq!(source.read_frames(&mut buf, 5).unwrap(), 1);
        assert_eq!(buf, vec![16384, -i16::MAX, i16::MAX, 0]);
    }

    #[test]
    fn test_seek() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seek.wav");
        let frames: Vec<Vec<i16>> = (0..50).map(|i| vec![i as i16 * 10]).collect();
        crate::test_util::write_wav(&path, 1, &frames);

        let mut source = match WavSource::open(&path) {
            Ok(source) => source,
            Err(_) => panic!("WAV should open"),
        };
        source.seek(42).unwrap();
        let mut buf = Vec::new();
        source.read_frames(&mut buf, 3).unwrap();
        assert_eq!(buf, vec![420, 430, 440]);
    }
}
