//! Decoder for non-WAV containers over symphonia
//!
//! Symphonia decodes packet by packet, so seeking is done by decoding and
//! discarding. Backward seeks reopen the file.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{SoundSource, SourceInfo};
use crate::error::{StreamError, StreamResult};
use crate::types::Sample;

/// Sound file decoded through symphonia (FLAC, OGG/Vorbis, ...)
pub struct DecodedSource {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: SourceInfo,
    /// Decoded interleaved samples not yet handed out
    pending: Vec<Sample>,
    pending_pos: usize,
    /// Frame index of the next frame `read_frames` returns
    position: u64,
}

impl DecodedSource {
    pub fn open(path: &Path) -> StreamResult<Self> {
        let open_error = |msg: String| StreamError::SourceOpen(format!("{}: {}", path.display(), msg));

        let file = File::open(path).map_err(|e| open_error(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| open_error(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| open_error("no audio track found".into()))?;

        let track_id = track.id;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count())
            .filter(|&c| c > 0)
            .ok_or_else(|| open_error("unknown channel layout".into()))?;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| open_error("unknown sample rate".into()))?;
        let frames = track
            .codec_params
            .n_frames
            .ok_or_else(|| open_error("unknown stream length".into()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| open_error(e.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            info: SourceInfo {
                channels,
                sample_rate,
                frames,
            },
            pending: Vec::new(),
            pending_pos: 0,
            position: 0,
        })
    }

    /// Decode the next packet of our track into `pending`
    ///
    /// Returns false at end of stream.
    fn decode_next(&mut self) -> StreamResult<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(e) => return Err(StreamError::Read(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buffer = SampleBuffer::<Sample>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    self.pending.clear();
                    self.pending.extend_from_slice(buffer.samples());
                    self.pending_pos = 0;
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("DecodedSource: skipping corrupt packet in {:?}: {}", self.path, e);
                    continue;
                }
                Err(e) => return Err(StreamError::Read(e.to_string())),
            }
        }
    }

    fn pending_frames(&self) -> usize {
        (self.pending.len() - self.pending_pos) / self.info.channels
    }
}

impl SoundSource for DecodedSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn seek(&mut self, frame: u64) -> StreamResult<()> {
        if frame < self.position {
            *self = DecodedSource::open(&self.path)
                .map_err(|e| StreamError::Read(format!("reopen for seek failed: {}", e)))?;
        }

        while self.position < frame {
            if self.pending_frames() == 0 && !self.decode_next()? {
                return Err(StreamError::Read(format!(
                    "seek to frame {} past end of stream ({} frames)",
                    frame, self.position
                )));
            }
            let skip = (self.pending_frames() as u64).min(frame - self.position) as usize;
            self.pending_pos += skip * self.info.channels;
            self.position += skip as u64;
        }

        Ok(())
    }

    fn read_frames(&mut self, buf: &mut Vec<Sample>, max_frames: usize) -> StreamResult<usize> {
        let channels = self.info.channels;
        let mut read = 0;

        while read < max_frames {
            if self.pending_frames() == 0 && !self.decode_next()? {
                break;
            }
            let take = self.pending_frames().min(max_frames - read);
            let end = self.pending_pos + take * channels;
            buf.extend_from_slice(&self.pending[self.pending_pos..end]);
            self.pending_pos = end;
            read += take;
        }

        self.position += read as u64;
        Ok(read)
    }
}
