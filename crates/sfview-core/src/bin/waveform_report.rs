//! Print a waveform overview of a sound file
//!
//! Usage: waveform-report <file> [--columns N] [--channel C] [--config PATH]
//!                               [--begin FRAME --frames COUNT]
//!
//! The file is loaded through the summary cache with the bounds from the
//! cache config (default: ~/.config/sfview/cache.yaml), then one line per
//! display column is printed with its min/max envelope, RMS band and mean.
//! Set RUST_LOG=debug for loader details.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use sfview_core::config::{default_config_path, load_config, CacheConfig};
use sfview_core::{CacheEvent, CacheMode, DisplayData, LoadState, SoundCacheStream, SoundStream};

const DEFAULT_COLUMNS: usize = 64;
const BAR_WIDTH: usize = 40;

struct Args {
    file: PathBuf,
    columns: usize,
    channel: usize,
    config: PathBuf,
    range: Option<(u64, u64)>,
}

fn parse_args() -> Result<Args> {
    let mut file = None;
    let mut columns = DEFAULT_COLUMNS;
    let mut channel = 0;
    let mut config = default_config_path("cache.yaml");
    let mut begin = None;
    let mut frames = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |name: &str| args.next().with_context(|| format!("{} needs a value", name));
        match arg.as_str() {
            "--columns" => columns = value("--columns")?.parse().context("invalid --columns")?,
            "--channel" => channel = value("--channel")?.parse().context("invalid --channel")?,
            "--config" => config = PathBuf::from(value("--config")?),
            "--begin" => begin = Some(value("--begin")?.parse::<u64>().context("invalid --begin")?),
            "--frames" => frames = Some(value("--frames")?.parse::<u64>().context("invalid --frames")?),
            other if other.starts_with("--") => bail!("unknown option {}", other),
            other => {
                if file.replace(PathBuf::from(other)).is_some() {
                    bail!("only one input file is supported");
                }
            }
        }
    }

    let range = match (begin, frames) {
        (None, None) => None,
        (Some(begin), Some(frames)) => Some((begin, frames)),
        _ => bail!("--begin and --frames must be given together"),
    };
    if columns == 0 {
        bail!("--columns must be at least 1");
    }

    Ok(Args {
        file: file.context(
            "usage: waveform-report <file> [--columns N] [--channel C] [--config PATH] [--begin FRAME --frames COUNT]",
        )?,
        columns,
        channel,
        config,
        range,
    })
}

fn bar(low: i16, high: i16) -> String {
    let scale = |s: i16| ((s as f64 / i16::MAX as f64 + 1.0) * 0.5 * (BAR_WIDTH - 1) as f64).round() as usize;
    let (lo, hi) = (scale(low).min(BAR_WIDTH - 1), scale(high).min(BAR_WIDTH - 1));
    (0..BAR_WIDTH)
        .map(|i| if i >= lo && i <= hi { '#' } else { '.' })
        .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let config: CacheConfig = load_config(&args.config);
    log::debug!("Cache config: {:?}", config);

    let mut cache = SoundCacheStream::new();
    let events = cache.subscribe();
    let started = match args.range {
        Some((begin, frames)) => cache.load_file_range(&args.file, begin, frames, &config),
        None => cache.load_file(&args.file, &config),
    };
    started.with_context(|| format!("failed to load {:?}", args.file))?;

    let mut last_logged = 0;
    while cache.is_loading() {
        cache.poll();
        for event in events.try_iter() {
            if let CacheEvent::Progress(percent) = event {
                if percent >= last_logged + 10 {
                    log::info!("Loading {:?}: {}%", args.file, percent);
                    last_logged = percent;
                }
            }
        }
        thread::sleep(Duration::from_millis(20));
    }
    if let LoadState::Failed(msg) = cache.state() {
        bail!("failed to load {:?}: {}", args.file, msg);
    }

    let info = cache.info();
    println!("File:        {}", args.file.display());
    println!("Channels:    {}", info.channels);
    println!("Sample rate: {} Hz", info.sample_rate);
    println!(
        "Range:       frames {}..{} ({:.2}s)",
        info.beginning,
        info.end(),
        info.duration_seconds()
    );
    match cache.mode() {
        Some(CacheMode::Summary { fpu }) => {
            println!("Cache:       {} units/channel, {} frames/unit", cache.unit_count(), fpu)
        }
        _ => println!("Cache:       raw ({} frames/channel)", cache.unit_count()),
    }
    println!();

    if info.duration == 0 {
        println!("(empty range)");
        return Ok(());
    }

    let units = cache
        .integrate(args.channel, info.beginning as f64, info.duration as f64, args.columns)
        .context("failed to summarize channel")?;
    let data = DisplayData::from_units(&units);
    let frames_per_column = info.duration as f64 / args.columns as f64;

    println!(
        "{:>12} {:>7} {:>7} {:>7} {:>7} {:>9}  envelope",
        "frame", "min", "max", "-rms", "+rms", "mean"
    );
    for column in 0..data.len() {
        let frame = info.beginning as f64 + frames_per_column * column as f64;
        println!(
            "{:>12.1} {:>7} {:>7} {:>7} {:>7} {:>9.1}  {}",
            frame,
            data.min[column],
            data.max[column],
            data.min_rms[column],
            data.max_rms[column],
            units[column].mean(),
            bar(data.min[column], data.max[column])
        );
    }

    Ok(())
}
