//! Background cache builder
//!
//! A cache build is a single pass over the source on a dedicated thread.
//! The thread owns every buffer it writes; the finished cache is handed to
//! the owning `SoundCacheStream` through a channel, so the stream never sees
//! a partially built unit array.
//!
//! ```text
//! SoundCacheStream ──spawn──► loader thread
//!        ▲                        │ read block, fold into units
//!        │   Progress(0..=99)     │
//!        ├────────────────────────┤
//!        │   Progress(100)        │
//!        │   Finished(Result)     ▼
//!      poll()/wait()            exit
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use crate::config::CacheConfig;
use crate::error::{StreamError, StreamResult};
use crate::source::SoundSource;
use crate::types::{Sample, SummaryUnit};

/// How a cache stores its range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Raw frames kept per channel (one frame per unit)
    Raw,
    /// Frames folded into summary units of `fpu` frames each
    Summary { fpu: u64 },
}

/// Frames per unit needed to fit `duration` frames into `max_units` units
pub fn frames_per_unit(duration: u64, max_units: u64) -> u64 {
    duration.div_ceil(max_units.max(1)).max(1)
}

/// What a cache build reads and how it stores it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildPlan {
    /// Channel count of the source
    pub channels: usize,
    /// First source frame to read
    pub source_start: u64,
    /// Number of frames to read
    pub duration: u64,
    pub mode: CacheMode,
    /// Frames requested from the source per read
    pub block_frames: usize,
}

impl BuildPlan {
    pub fn new(channels: usize, source_start: u64, duration: u64, config: &CacheConfig) -> Self {
        let config = config.validated();
        let mode = if duration <= config.max_raw_frames {
            CacheMode::Raw
        } else {
            CacheMode::Summary {
                fpu: frames_per_unit(duration, config.max_units),
            }
        };

        Self {
            channels,
            source_start,
            duration,
            mode,
            block_frames: config.read_block_frames,
        }
    }

    /// Source frames per unit (1 for raw caches)
    pub fn fpu(&self) -> u64 {
        match self.mode {
            CacheMode::Raw => 1,
            CacheMode::Summary { fpu } => fpu,
        }
    }

    /// Units per channel, counting a partial last unit
    pub fn unit_count(&self) -> u64 {
        self.duration.div_ceil(self.fpu())
    }
}

/// A finished cache
#[derive(Debug, Clone)]
pub(crate) enum CacheData {
    /// Raw samples per channel
    Raw(Vec<Vec<Sample>>),
    /// Summary units per channel
    Summary {
        fpu: u64,
        units: Vec<Vec<SummaryUnit>>,
    },
}

impl CacheData {
    pub(crate) fn mode(&self) -> CacheMode {
        match self {
            CacheData::Raw(_) => CacheMode::Raw,
            CacheData::Summary { fpu, .. } => CacheMode::Summary { fpu: *fpu },
        }
    }
}

fn per_channel_buffers<T>(channels: usize, capacity: usize) -> Vec<Vec<T>> {
    (0..channels).map(|_| Vec::with_capacity(capacity)).collect()
}

/// Per-channel accumulation state while the build runs
enum Builder {
    Raw(Vec<Vec<Sample>>),
    Summary {
        fpu: u64,
        filled: u64,
        current: Vec<SummaryUnit>,
        units: Vec<Vec<SummaryUnit>>,
    },
}

impl Builder {
    fn new(plan: &BuildPlan) -> Self {
        let per_channel = plan.unit_count() as usize;
        match plan.mode {
            CacheMode::Raw => Builder::Raw(per_channel_buffers(plan.channels, per_channel)),
            CacheMode::Summary { fpu } => Builder::Summary {
                fpu,
                filled: 0,
                current: vec![SummaryUnit::EMPTY; plan.channels],
                units: per_channel_buffers(plan.channels, per_channel),
            },
        }
    }

    fn push_frames(&mut self, block: &[Sample], channels: usize) {
        match self {
            Builder::Raw(raw) => {
                for frame in block.chunks_exact(channels) {
                    for (channel, &sample) in frame.iter().enumerate() {
                        raw[channel].push(sample);
                    }
                }
            }
            Builder::Summary {
                fpu,
                filled,
                current,
                units,
            } => {
                for frame in block.chunks_exact(channels) {
                    for (channel, &sample) in frame.iter().enumerate() {
                        current[channel].accumulate(sample);
                    }
                    *filled += 1;
                    if *filled == *fpu {
                        for (channel, unit) in current.iter_mut().enumerate() {
                            units[channel].push(std::mem::take(unit));
                        }
                        *filled = 0;
                    }
                }
            }
        }
    }

    fn finish(self) -> CacheData {
        match self {
            Builder::Raw(raw) => CacheData::Raw(raw),
            Builder::Summary {
                fpu,
                filled,
                current,
                mut units,
            } => {
                if filled > 0 {
                    for (channel, unit) in current.into_iter().enumerate() {
                        units[channel].push(unit);
                    }
                }
                CacheData::Summary { fpu, units }
            }
        }
    }
}

/// Read the planned range and fold it into a cache
///
/// `progress` receives strictly increasing percentages below 100. Returns
/// `Ok(None)` if `cancel` was raised before the build finished.
pub(crate) fn build_cache(
    source: &mut dyn SoundSource,
    plan: &BuildPlan,
    cancel: &AtomicBool,
    mut progress: impl FnMut(u8),
) -> StreamResult<Option<CacheData>> {
    let channels = plan.channels;
    let mut builder = Builder::new(plan);
    let mut block = Vec::with_capacity(plan.block_frames * channels);
    let mut consumed = 0u64;
    let mut reported = 0u8;

    source.seek(plan.source_start)?;

    while consumed < plan.duration {
        if cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let wanted = (plan.duration - consumed).min(plan.block_frames as u64) as usize;
        block.clear();
        let read = source.read_frames(&mut block, wanted)?;
        if read == 0 {
            return Err(StreamError::Read(format!(
                "source ended after {} of {} frames",
                consumed, plan.duration
            )));
        }
        let read = read.min(wanted);
        builder.push_frames(&block[..read * channels], channels);
        consumed += read as u64;

        let percent = ((consumed * 100) / plan.duration).min(99) as u8;
        if percent > reported {
            reported = percent;
            progress(percent);
        }
    }

    Ok(Some(builder.finish()))
}

/// Messages from the loader thread to the owning stream
pub(crate) enum LoaderMessage {
    Progress(u8),
    Finished(StreamResult<CacheData>),
}

/// Handle to a running cache build
///
/// Dropping the handle cancels the build and joins the thread.
pub(crate) struct CacheLoader {
    rx: Receiver<LoaderMessage>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CacheLoader {
    /// Start building `plan` from `source` on a new thread
    pub(crate) fn spawn(source: Box<dyn SoundSource>, plan: BuildPlan) -> StreamResult<Self> {
        let (tx, rx) = channel::unbounded();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();

        let handle = thread::Builder::new()
            .name("sound-cache-loader".to_string())
            .spawn(move || {
                loader_thread(source, plan, cancel_flag, tx);
            })
            .map_err(|e| StreamError::LoaderSpawn(e.to_string()))?;

        Ok(Self {
            rx,
            cancel,
            handle: Some(handle),
        })
    }

    /// Next message if one is waiting; `Err(Disconnected)` once the thread is gone
    pub(crate) fn try_recv(&self) -> Result<LoaderMessage, TryRecvError> {
        self.rx.try_recv()
    }

    /// Block for the next message; `None` once the thread is gone
    pub(crate) fn recv(&self) -> Option<LoaderMessage> {
        self.rx.recv().ok()
    }

    /// Stop the build and wait for the thread to exit
    pub(crate) fn cancel(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Sound cache loader thread panicked");
            }
        }
    }
}

impl Drop for CacheLoader {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn loader_thread(
    mut source: Box<dyn SoundSource>,
    plan: BuildPlan,
    cancel: Arc<AtomicBool>,
    tx: Sender<LoaderMessage>,
) {
    let start = Instant::now();
    log::debug!(
        "Cache loader: {} frames x {} channels from frame {}, {:?}",
        plan.duration,
        plan.channels,
        plan.source_start,
        plan.mode
    );

    let result = build_cache(source.as_mut(), &plan, &cancel, |percent| {
        let _ = tx.send(LoaderMessage::Progress(percent));
    });

    match result {
        Ok(Some(data)) => {
            log::info!(
                "Cache loader: built {} units/channel in {:?}",
                plan.unit_count(),
                start.elapsed()
            );
            let _ = tx.send(LoaderMessage::Progress(100));
            let _ = tx.send(LoaderMessage::Finished(Ok(data)));
        }
        Ok(None) => {
            log::debug!("Cache loader: cancelled after {:?}", start.elapsed());
        }
        Err(e) => {
            log::warn!("Cache loader: build failed: {}", e);
            let _ = tx.send(LoaderMessage::Finished(Err(e)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySamples, MemorySource};

    fn config(max_units: u64, max_raw_frames: u64) -> CacheConfig {
        CacheConfig {
            max_units,
            max_raw_frames,
            read_block_frames: 1000,
        }
    }

    #[test]
    fn test_frames_per_unit() {
        assert_eq!(frames_per_unit(1_000_000, 1000), 1000);
        assert_eq!(frames_per_unit(1_000_001, 1000), 1001);
        assert_eq!(frames_per_unit(10, 1000), 1);
        assert_eq!(frames_per_unit(0, 1000), 1);
        assert_eq!(frames_per_unit(10, 0), 10);
    }

    #[test]
    fn test_plan_modes() {
        let raw = BuildPlan::new(1, 0, 500, &config(100, 2000));
        assert_eq!(raw.mode, CacheMode::Raw);
        assert_eq!(raw.fpu(), 1);
        assert_eq!(raw.unit_count(), 500);

        let summary = BuildPlan::new(2, 0, 1_000_000, &config(1000, 2000));
        assert_eq!(summary.mode, CacheMode::Summary { fpu: 1000 });
        assert_eq!(summary.unit_count(), 1000);

        let partial = BuildPlan::new(1, 0, 2500, &config(2, 100));
        assert_eq!(partial.fpu(), 1250);
        assert_eq!(partial.unit_count(), 2);
    }

    #[test]
    fn test_build_flushes_partial_unit() {
        let data: Vec<i16> = (0..25).collect();
        let mut source = MemorySource::new(MemorySamples::new(data, 1, 44100).unwrap());
        let plan = BuildPlan {
            channels: 1,
            source_start: 0,
            duration: 25,
            mode: CacheMode::Summary { fpu: 10 },
            block_frames: 7,
        };
        let cancel = AtomicBool::new(false);
        let mut seen = Vec::new();
        let data = build_cache(&mut source, &plan, &cancel, |p| seen.push(p))
            .unwrap()
            .unwrap();

        let CacheData::Summary { fpu, units } = data else {
            panic!("expected summary cache");
        };
        assert_eq!(fpu, 10);
        let frames: Vec<u64> = units[0].iter().map(|u| u.frames).collect();
        assert_eq!(frames, vec![10, 10, 5]);
        assert_eq!((units[0][2].min, units[0][2].max), (20, 24));
        assert_eq!(units[0][0].sum, 45.0);

        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert!(seen.iter().all(|&p| p < 100));
    }

    #[test]
    fn test_build_reads_from_source_start() {
        let data: Vec<i16> = (0..40).collect();
        let mut source = MemorySource::new(MemorySamples::new(data, 2, 44100).unwrap());
        let plan = BuildPlan::new(2, 5, 10, &config(100, 100));
        let cancel = AtomicBool::new(false);
        let data = build_cache(&mut source, &plan, &cancel, |_| {}).unwrap().unwrap();

        let CacheData::Raw(raw) = data else {
            panic!("expected raw cache");
        };
        assert_eq!(raw[0], (5..15).map(|f| (f * 2) as i16).collect::<Vec<_>>());
        assert_eq!(raw[1], (5..15).map(|f| (f * 2 + 1) as i16).collect::<Vec<_>>());
    }

    #[test]
    fn test_build_fails_on_short_source() {
        let mut source = MemorySource::new(MemorySamples::new(vec![0; 10], 1, 44100).unwrap());
        let plan = BuildPlan {
            channels: 1,
            source_start: 0,
            duration: 20,
            mode: CacheMode::Raw,
            block_frames: 4,
        };
        let cancel = AtomicBool::new(false);
        let result = build_cache(&mut source, &plan, &cancel, |_| {});
        assert!(matches!(result, Err(StreamError::Read(_))));
    }

    #[test]
    fn test_build_stops_when_cancelled() {
        let mut source = MemorySource::new(MemorySamples::new(vec![0; 10], 1, 44100).unwrap());
        let plan = BuildPlan::new(1, 0, 10, &config(100, 100));
        let cancel = AtomicBool::new(true);
        let result = build_cache(&mut source, &plan, &cancel, |_| {}).unwrap();
        assert!(result.is_none());
    }
}
