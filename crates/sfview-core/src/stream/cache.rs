//! Cached / downsampled backend
//!
//! `SoundCacheStream` reads its source once on a background thread and keeps
//! either the raw frames (short ranges) or a fixed number of summary units
//! per channel. Display queries are answered from the cache by merging unit
//! statistics, without touching the source again.
//!
//! ## Load state
//!
//! ```text
//! Idle ──load──► Loading ──► Ready
//!                   │
//!                   └──────► Failed
//! ```
//!
//! A new load may start from any state except `Loading`; it discards the
//! previous cache. Progress and completion reach the owning context when it
//! calls [`SoundCacheStream::poll`] or [`SoundCacheStream::wait`], which also
//! forward them as [`CacheEvent`]s to every subscriber.
//!
//! ## Usage
//!
//! ```ignore
//! let mut cache = SoundCacheStream::new();
//! let events = cache.subscribe();
//! cache.load_file("take1.wav", &CacheConfig::default())?;
//!
//! // In the tick handler:
//! cache.poll();
//! while let Ok(event) = events.try_recv() {
//!     // update a progress bar, redraw on CacheEvent::Ready
//! }
//! if cache.is_ready() {
//!     let columns = cache.display_data(0, 0.0, cache.duration() as f64, width)?;
//! }
//! ```

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use super::loader::{BuildPlan, CacheData, CacheLoader, CacheMode, LoaderMessage};
use super::{check_channel, integrate_raw, raw_range, ColumnLayout, DisplayData, RawFrames, SoundStream};
use crate::config::CacheConfig;
use crate::error::{StreamError, StreamResult};
use crate::source::{open_source, read_range, MemorySamples, MemorySource, SoundSource, SourceOrigin};
use crate::types::{sample_from_normalized, Sample, StreamInfo, SummaryUnit};

/// Load state of a cache
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    /// Nothing loaded yet
    #[default]
    Idle,
    /// A build is running
    Loading { progress: u8 },
    /// The cache can be queried
    Ready,
    /// The last build failed
    Failed(String),
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Idle => write!(f, "idle"),
            LoadState::Loading { progress } => write!(f, "loading ({}%)", progress),
            LoadState::Ready => write!(f, "ready"),
            LoadState::Failed(msg) => write!(f, "failed ({})", msg),
        }
    }
}

/// Notification delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Percentage of source frames consumed (non-decreasing, 100 only on success)
    Progress(u8),
    /// The cache finished building and can be queried
    Ready,
    /// The build failed; the cache holds no data
    Failed(String),
    /// The build was abandoned through `cancel()`; the cache is idle again
    Cancelled,
}

/// Sound stream answering queries from a summary cache
pub struct SoundCacheStream {
    info: StreamInfo,
    state: LoadState,
    /// Only set while `state` is `Ready`
    data: Option<CacheData>,
    /// Re-openable source for raw frames of summarized caches
    origin: Option<SourceOrigin>,
    /// Source frame corresponding to `info.beginning`
    source_start: u64,
    /// Block size used when re-reading the source
    read_block_frames: usize,
    loader: Option<CacheLoader>,
    subscribers: Vec<Sender<CacheEvent>>,
}

impl Default for SoundCacheStream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SoundCacheStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoundCacheStream")
            .field("info", &self.info)
            .field("state", &self.state)
            .field("mode", &self.mode())
            .field("origin", &self.origin)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl SoundCacheStream {
    pub fn new() -> Self {
        Self {
            info: StreamInfo::default(),
            state: LoadState::Idle,
            data: None,
            origin: None,
            source_start: 0,
            read_block_frames: CacheConfig::default().read_block_frames,
            loader: None,
            subscribers: Vec::new(),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // State
    // ────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, LoadState::Loading { .. })
    }

    /// Build progress in percent (100 once ready, 0 when idle or failed)
    pub fn load_progress(&self) -> u8 {
        match self.state {
            LoadState::Loading { progress } => progress,
            LoadState::Ready => 100,
            LoadState::Idle | LoadState::Failed(_) => 0,
        }
    }

    /// Receive progress and completion events
    ///
    /// Events are forwarded from `poll()`/`wait()`; a dropped receiver is
    /// forgotten on the next event.
    pub fn subscribe(&mut self) -> Receiver<CacheEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Storage mode of the ready cache
    pub fn mode(&self) -> Option<CacheMode> {
        self.data.as_ref().map(CacheData::mode)
    }

    /// Source frames per unit of the ready cache
    pub fn fpu(&self) -> Option<u64> {
        self.mode().map(|mode| match mode {
            CacheMode::Raw => 1,
            CacheMode::Summary { fpu } => fpu,
        })
    }

    pub fn is_raw(&self) -> bool {
        self.mode() == Some(CacheMode::Raw)
    }

    /// Units per channel in the ready cache (frames, for raw caches)
    pub fn unit_count(&self) -> usize {
        match &self.data {
            Some(CacheData::Raw(raw)) => raw.first().map_or(0, Vec::len),
            Some(CacheData::Summary { units, .. }) => units.first().map_or(0, Vec::len),
            None => 0,
        }
    }

    /// All units of `channel`; raw caches yield one single-frame unit per frame
    pub fn units(&self, channel: usize) -> StreamResult<Cow<'_, [SummaryUnit]>> {
        let data = self.ready_data("read cache units")?;
        check_channel(&self.info, channel)?;

        Ok(match data {
            CacheData::Raw(raw) => Cow::Owned(raw[channel].iter().map(|&s| SummaryUnit::from_sample(s)).collect()),
            CacheData::Summary { units, .. } => Cow::Borrowed(units[channel].as_slice()),
        })
    }

    /// Summary of unit `index` of `channel`
    pub fn unit(&self, channel: usize, index: usize) -> StreamResult<SummaryUnit> {
        let data = self.ready_data("read cache units")?;
        check_channel(&self.info, channel)?;

        let unit = match data {
            CacheData::Raw(raw) => raw[channel].get(index).map(|&s| SummaryUnit::from_sample(s)),
            CacheData::Summary { units, .. } => units[channel].get(index).copied(),
        };
        unit.ok_or(StreamError::OutOfRange {
            offset: index as f64,
            duration: 1.0,
            beginning: 0,
            available: self.unit_count() as u64,
        })
    }

    // ────────────────────────────────────────────────────────────────────
    // Loading
    // ────────────────────────────────────────────────────────────────────

    /// Cache a whole sound file
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P, config: &CacheConfig) -> StreamResult<()> {
        self.ensure_not_loading()?;
        let path = path.as_ref();
        let source = self.open_or_fail(path)?;
        let frames = source.info().frames;
        self.start_load(source, Some(SourceOrigin::File(path.to_path_buf())), 0, 0, frames, config)
    }

    /// Cache `duration` frames of a sound file starting at `beginning`
    pub fn load_file_range<P: AsRef<Path>>(
        &mut self,
        path: P,
        beginning: u64,
        duration: u64,
        config: &CacheConfig,
    ) -> StreamResult<()> {
        self.ensure_not_loading()?;
        let path = path.as_ref();
        let source = self.open_or_fail(path)?;
        self.start_load(
            source,
            Some(SourceOrigin::File(path.to_path_buf())),
            beginning,
            beginning,
            duration,
            config,
        )
    }

    /// Cache normalized interleaved samples; `beginning` labels the first frame
    pub fn load_samples(
        &mut self,
        data: &[f64],
        channels: usize,
        sample_rate: u32,
        beginning: u64,
        config: &CacheConfig,
    ) -> StreamResult<()> {
        self.ensure_not_loading()?;
        let samples = MemorySamples::from_normalized(data, channels, sample_rate)?;
        let frames = samples.frames();
        let source = Box::new(MemorySource::new(samples.clone()));
        self.start_load(source, Some(SourceOrigin::Memory(samples)), 0, beginning, frames, config)
    }

    /// Cache `duration` frames of an opened source starting at `beginning`
    ///
    /// `origin`, if given, is used to re-read raw frames from summarized caches.
    pub fn load_source(
        &mut self,
        source: Box<dyn SoundSource>,
        origin: Option<SourceOrigin>,
        beginning: u64,
        duration: u64,
        config: &CacheConfig,
    ) -> StreamResult<()> {
        self.ensure_not_loading()?;
        self.start_load(source, origin, beginning, beginning, duration, config)
    }

    /// Replace the cache with `frames` frames of silence, ready immediately
    pub fn allocate(&mut self, frames: u64, channels: usize, sample_rate: u32) -> StreamResult<()> {
        self.ensure_not_loading()?;
        if channels == 0 {
            return Err(StreamError::InvalidData("channel count must be at least 1".into()));
        }
        let len = usize::try_from(frames)
            .map_err(|_| StreamError::InvalidData(format!("cannot allocate {} frames", frames)))?;

        self.loader = None;
        self.info = StreamInfo::new(channels, sample_rate, 0, frames);
        self.origin = None;
        self.source_start = 0;
        self.data = Some(CacheData::Raw(vec![vec![0; len]; channels]));
        self.state = LoadState::Ready;
        log::debug!("SoundCacheStream: allocated {} frames x {} channels", frames, channels);
        self.notify(CacheEvent::Progress(100));
        self.notify(CacheEvent::Ready);
        Ok(())
    }

    /// Overwrite frames of a raw cache starting at frame `offset` (relative to the stream start)
    ///
    /// `data` holds normalized interleaved samples.
    pub fn write(&mut self, data: &[f64], offset: u64) -> StreamResult<()> {
        let channels = self.info.channels;
        let duration = self.info.duration;
        let state = self.state.to_string();

        let raw = match self.data.as_mut() {
            Some(CacheData::Raw(raw)) => raw,
            Some(CacheData::Summary { .. }) => {
                return Err(StreamError::InvalidState {
                    operation: "write frames",
                    state: "summarized".to_string(),
                })
            }
            None => {
                return Err(StreamError::InvalidState {
                    operation: "write frames",
                    state,
                })
            }
        };

        if data.len() % channels != 0 {
            return Err(StreamError::InvalidData(format!(
                "{} samples is not a whole number of {}-channel frames",
                data.len(),
                channels
            )));
        }
        let frames = (data.len() / channels) as u64;
        if offset.checked_add(frames).map_or(true, |end| end > duration) {
            return Err(StreamError::OutOfRange {
                offset: offset as f64,
                duration: frames as f64,
                beginning: 0,
                available: duration,
            });
        }

        for (index, frame) in data.chunks_exact(channels).enumerate() {
            let position = offset as usize + index;
            for (channel, &value) in frame.iter().enumerate() {
                raw[channel][position] = sample_from_normalized(value);
            }
        }
        Ok(())
    }

    /// Stop an in-flight build and return to `Idle`
    ///
    /// Subscribers receive `CacheEvent::Cancelled`. Does nothing unless a
    /// build is running.
    pub fn cancel(&mut self) {
        if let Some(mut loader) = self.loader.take() {
            loader.cancel();
            self.state = LoadState::Idle;
            log::debug!("SoundCacheStream: load cancelled");
            self.notify(CacheEvent::Cancelled);
        }
    }

    /// Apply pending loader messages without blocking
    pub fn poll(&mut self) -> &LoadState {
        loop {
            let message = match &self.loader {
                Some(loader) => loader.try_recv(),
                None => break,
            };
            match message {
                Ok(message) => self.handle_message(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.loader = None;
                    log::error!("SoundCacheStream: loader thread disconnected unexpectedly");
                    self.fail("loader thread exited before finishing".to_string());
                }
            }
        }
        &self.state
    }

    /// Block until the in-flight build finishes
    ///
    /// Returns `Ok` once ready, `LoadFailed` if the build failed, and an
    /// `InvalidState` error if nothing was ever loaded.
    pub fn wait(&mut self) -> StreamResult<()> {
        while self.is_loading() {
            let message = match &self.loader {
                Some(loader) => loader.recv(),
                None => None,
            };
            match message {
                Some(message) => self.handle_message(message),
                None => {
                    self.loader = None;
                    log::error!("SoundCacheStream: loader thread disconnected unexpectedly");
                    self.fail("loader thread exited before finishing".to_string());
                }
            }
        }

        match &self.state {
            LoadState::Ready => Ok(()),
            LoadState::Failed(msg) => Err(StreamError::LoadFailed(msg.clone())),
            state => Err(StreamError::InvalidState {
                operation: "wait for a load",
                state: state.to_string(),
            }),
        }
    }

    fn ensure_not_loading(&self) -> StreamResult<()> {
        if self.is_loading() {
            return Err(StreamError::InvalidState {
                operation: "start a load",
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    fn open_or_fail(&mut self, path: &Path) -> StreamResult<Box<dyn SoundSource>> {
        open_source(path).map_err(|e| {
            self.loader = None;
            self.fail(e.to_string());
            e
        })
    }

    fn start_load(
        &mut self,
        source: Box<dyn SoundSource>,
        origin: Option<SourceOrigin>,
        source_start: u64,
        beginning: u64,
        duration: u64,
        config: &CacheConfig,
    ) -> StreamResult<()> {
        let source_info = source.info();
        let whole = StreamInfo::new(source_info.channels, source_info.sample_rate, 0, source_info.frames);
        raw_range(&whole, source_start, duration)?;

        // Joins any previous loader before its storage goes away
        self.loader = None;
        self.data = None;

        let plan = BuildPlan::new(source_info.channels, source_start, duration, config);
        log::info!(
            "SoundCacheStream: loading {} frames x {} channels ({:?}, {} units/channel)",
            duration,
            source_info.channels,
            plan.mode,
            plan.unit_count()
        );

        self.info = StreamInfo::new(source_info.channels, source_info.sample_rate, beginning, duration);
        self.origin = origin;
        self.source_start = source_start;
        self.read_block_frames = plan.block_frames;

        match CacheLoader::spawn(source, plan) {
            Ok(loader) => {
                self.loader = Some(loader);
                self.state = LoadState::Loading { progress: 0 };
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn handle_message(&mut self, message: LoaderMessage) {
        match message {
            LoaderMessage::Progress(percent) => {
                let advanced = match &mut self.state {
                    LoadState::Loading { progress } if percent > *progress => {
                        *progress = percent;
                        true
                    }
                    _ => false,
                };
                if advanced {
                    self.notify(CacheEvent::Progress(percent));
                }
            }
            LoaderMessage::Finished(Ok(data)) => {
                self.loader = None;
                self.data = Some(data);
                self.state = LoadState::Ready;
                log::info!(
                    "SoundCacheStream: ready ({:?}, {} units/channel)",
                    self.mode(),
                    self.unit_count()
                );
                self.notify(CacheEvent::Ready);
            }
            LoaderMessage::Finished(Err(e)) => {
                self.loader = None;
                self.fail(e.to_string());
            }
        }
    }

    fn fail(&mut self, msg: String) {
        log::warn!("SoundCacheStream: load failed: {}", msg);
        self.data = None;
        self.state = LoadState::Failed(msg.clone());
        self.notify(CacheEvent::Failed(msg));
    }

    fn notify(&mut self, event: CacheEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn ready_data(&self, operation: &'static str) -> StreamResult<&CacheData> {
        match (&self.state, &self.data) {
            (LoadState::Ready, Some(data)) => Ok(data),
            (state, _) => Err(StreamError::InvalidState {
                operation,
                state: state.to_string(),
            }),
        }
    }

    /// Per-column statistics over the window `[offset, offset + duration)`
    ///
    /// Summarized caches merge whole units, so a column's statistics cover
    /// every unit its frames touch.
    pub fn integrate(
        &self,
        channel: usize,
        offset: f64,
        duration: f64,
        columns: usize,
    ) -> StreamResult<Vec<SummaryUnit>> {
        let data = self.ready_data("query display data")?;
        check_channel(&self.info, channel)?;
        let layout = ColumnLayout::new(&self.info, offset, duration, columns)?;

        Ok(match data {
            CacheData::Raw(raw) => {
                let samples = &raw[channel];
                integrate_raw(&RawFrames::strided(samples, 0, 1, samples.len()), &layout)
            }
            CacheData::Summary { fpu, units } => Self::merge_units(&units[channel], *fpu, &layout),
        })
    }

    /// Merge the units touched by each column
    fn merge_units(units: &[SummaryUnit], fpu: u64, layout: &ColumnLayout) -> Vec<SummaryUnit> {
        (0..layout.columns())
            .map(|column| {
                let span = layout.span(column);
                let first = (span.start / fpu) as usize;
                let last = (span.end.div_ceil(fpu) as usize).min(units.len());
                let mut merged = SummaryUnit::EMPTY;
                for unit in units.get(first..last).unwrap_or(&[]) {
                    merged.merge(unit);
                }
                merged
            })
            .collect()
    }
}

impl SoundStream for SoundCacheStream {
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
        let data = self.ready_data("read raw frames")?;
        check_channel(&self.info, channel)?;
        let range = raw_range(&self.info, beginning, duration)?;

        match data {
            CacheData::Raw(raw) => Ok(RawFrames::strided(&raw[channel], range.start, 1, range.len())),
            CacheData::Summary { fpu: 1, units } => Ok(RawFrames::owned(
                units[channel][range].iter().map(|unit| unit.min).collect(),
            )),
            CacheData::Summary { .. } => {
                let origin = self.origin.as_ref().ok_or(StreamError::InvalidState {
                    operation: "read raw frames",
                    state: "summarized without a source".to_string(),
                })?;
                log::debug!(
                    "SoundCacheStream: re-reading {} raw frames of channel {} from {:?}",
                    duration,
                    channel,
                    origin
                );

                let mut source = origin.open()?;
                let channels = self.info.channels;
                let interleaved = read_range(
                    source.as_mut(),
                    self.source_start + range.start as u64,
                    duration,
                    self.read_block_frames,
                )?;
                let samples: Vec<Sample> = interleaved
                    .iter()
                    .skip(channel)
                    .step_by(channels)
                    .copied()
                    .collect();
                Ok(RawFrames::owned(samples))
            }
        }
    }
}

impl Drop for SoundCacheStream {
    fn drop(&mut self) {
        // Stop the builder before the stream's storage is released
        if let Some(mut loader) = self.loader.take() {
            loader.cancel();
        }
    }
}
