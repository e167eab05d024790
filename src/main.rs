use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use frappe::config::AppConfig;
use frappe::playback::rate::RateEstimator;
use frappe::playback::Chunk;
use frappe::session::Session;
use frappe::visibility::FrameRange;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "frappe", version, about = "MINFLUX track timestep inference and replay")]
struct Cli {
    /// Path to a config file (defaults to the XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a track file and print per-track statistics
    Info {
        /// Track file (.npy or .json)
        file: PathBuf,
    },

    /// Infer the acquisition timestep of a track file
    Timestep {
        /// Track file (.npy or .json)
        file: PathBuf,

        /// Print the assigned frame of every detection, one per line
        #[arg(long)]
        frames: bool,
    },

    /// Replay tracks chunk by chunk, the way a viewer's timer would
    Replay {
        /// Track file (.npy or .json)
        file: PathBuf,

        /// Number of ticks to run
        #[arg(short = 'n', long, default_value = "100")]
        ticks: u64,

        /// Frames added per tick (overrides config)
        #[arg(short, long)]
        frames_per_update: Option<i64>,

        /// Maximum window width in frames (overrides config)
        #[arg(short, long)]
        max_localizations: Option<i64>,

        /// Share one window across all tracks
        #[arg(long)]
        synchronized: bool,

        /// Sleep for the tick period between ticks
        #[arg(long)]
        realtime: bool,

        /// Target localizations per second; adjusts frames per tick to the
        /// measured tick rate (needs --realtime)
        #[arg(long, requires = "realtime")]
        rate: Option<f64>,

        /// Only replay these track ids
        #[arg(long = "only")]
        only: Vec<i64>,

        /// Restrict a track's frame range, as ID:START:END
        #[arg(long = "range", value_parser = parse_range)]
        ranges: Vec<(i64, i64, i64)>,

        /// Emit one JSON line per tick instead of a summary
        #[arg(long)]
        json: bool,
    },
}

fn parse_range(s: &str) -> std::result::Result<(i64, i64, i64), String> {
    let parts: Vec<&str> = s.split(':').collect();
    let &[id, start, end] = parts.as_slice() else {
        return Err(format!("expected ID:START:END, got '{}'", s));
    };
    let num = |v: &str| v.trim().parse::<i64>().map_err(|e| format!("'{}': {}", v, e));
    Ok((num(id)?, num(start)?, num(end)?))
}

/// One tick as written by `replay --json`.
#[derive(Serialize)]
struct TickLine {
    tick: u64,
    play_time: f64,
    tracks: Vec<TrackLine>,
}

#[derive(Serialize)]
struct TrackLine {
    track_id: i64,
    window: FrameRange,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl TickLine {
    fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            tick: chunk.tick,
            play_time: chunk.play_time,
            tracks: chunk
                .tracks
                .values()
                .map(|t| {
                    let (x, y) = t.xy();
                    TrackLine {
                        track_id: t.track_id,
                        window: t.window,
                        x,
                        y,
                    }
                })
                .collect(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config file (optional, defaults if missing)
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    // -v wins over the config file's log_level
    let log_level = match cli.verbose {
        0 => config.log_level.clone().unwrap_or_else(|| "warn".to_string()),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Info { file } => {
            let session = Session::open(&file, config.playback)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            let store = &session.store;

            println!("File:           {}", file.display());
            println!("Localizations:  {}", store.len());
            println!("Tracks:         {}", store.n_tracks());
            println!("Timestep:       {:.6} s", store.dt());
            println!("Last frame:     {}", store.max_frame());
            println!();
            print_stats_table(&session);
        }

        Commands::Timestep { file, frames } => {
            let raw = frappe::reader::read_tracks(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let result = frappe::timestep::infer(&raw.time, &raw.track_id)
                .context("Timestep inference failed")?;

            if frames {
                for (t, frame) in raw.time.iter().zip(&result.frames) {
                    println!("{:.9} {}", t, frame);
                }
            } else {
                let last = result.frames.iter().copied().max().unwrap_or(0);
                println!("dt = {:.9} s ({} detections, last frame {})", result.dt, raw.len(), last);
            }
        }

        Commands::Replay {
            file,
            ticks,
            frames_per_update,
            max_localizations,
            synchronized,
            realtime,
            rate,
            only,
            ranges,
            json,
        } => {
            let mut playback = config.playback;
            if let Some(f) = frames_per_update {
                playback.frames_per_update = f;
            }
            if let Some(m) = max_localizations {
                playback.max_localizations_per_track = m;
            }
            playback.synchronized |= synchronized;

            let mut session = Session::open(&file, playback)
                .with_context(|| format!("Failed to load {}", file.display()))?;

            if !only.is_empty() {
                session.controller.hide_all();
                for id in &only {
                    session.controller.set_visible(*id, true)
                        .context("Invalid --only")?;
                }
            }
            for (id, start, end) in ranges {
                session.controller.set_range_start(id, start).context("Invalid --range")?;
                session.controller.set_range_end(id, end).context("Invalid --range")?;
            }

            let period = playback.tick_period();
            let mut estimator = RateEstimator::new(period);
            let pb = if json {
                None
            } else {
                let pb = ProgressBar::new(ticks);
                pb.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
                );
                Some(pb)
            };

            let mut total_localizations = 0usize;
            session.engine.play();
            estimator.restart(Instant::now());

            for _ in 0..ticks {
                let chunk = session.tick().context("Replay tick failed")?;
                total_localizations += chunk.n_localizations();

                if json {
                    println!("{}", serde_json::to_string(&TickLine::from_chunk(chunk))?);
                }
                if let Some(pb) = &pb {
                    pb.set_message(format!("t = {:.3} s", chunk.play_time));
                    pb.inc(1);
                }

                if realtime {
                    std::thread::sleep(period);
                    estimator.observe(Instant::now());
                    if let Some(target) = rate {
                        session.engine
                            .set_frames_per_update(estimator.frames_for_rate(target))
                            .context("Invalid --rate")?;
                    }
                }
            }
            session.engine.pause();

            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            if json {
                return Ok(());
            }

            let chunk = session.engine.snapshot();
            let engine_config = session.engine.config();
            println!(
                "Replay complete: {} ticks, {:.3} s of acquisition, {} localizations drawn",
                chunk.tick, chunk.play_time, total_localizations
            );
            if realtime {
                println!(
                    "Measured {:.1} ticks/s, {:.0} frames/s at {} frames per tick",
                    estimator.rate(),
                    estimator.localizations_per_second(engine_config.frames_per_update),
                    engine_config.frames_per_update
                );
            }
            println!();
            print_window_table(&session);
        }
    }

    Ok(())
}

/// Print per-track statistics with the label anchor a viewer would use.
fn print_stats_table(session: &Session) {
    println!(
        "{:>8} {:>7} {:>7}  {:>9} {:>9} {:>9}  {:>8} {:>8}  {:>9} {:>9}",
        "Track", "Locs", "Frames", "X", "Y", "Z", "SdX", "SdY", "LblX", "LblY"
    );
    println!("{}", "-".repeat(103));

    for s in session.store.all_stats() {
        let anchor = s.label_anchor();
        println!(
            "{:>8} {:>7} {:>7}  {:>9.2} {:>9.2} {:>9.2}  {:>8.2} {:>8.2}  {:>9.2} {:>9.2}",
            s.track_id,
            s.localizations,
            s.max_frame + 1,
            s.centroid.x,
            s.centroid.y,
            s.centroid.z,
            s.spread.x,
            s.spread.y,
            anchor.x,
            anchor.y,
        );
    }

    println!();
    println!("X/Y/Z = centroid  SdX/SdY = population standard deviation");
    println!("LblX/LblY = label anchor (centroid + 1.25 x spread)");
}

/// Print the last window drawn for every track.
fn print_window_table(session: &Session) {
    let chunk = session.engine.snapshot();
    println!("{:>8} {:>8} {:>8} {:>7} {:>8}", "Track", "Start", "End", "Locs", "Cursor");
    println!("{}", "-".repeat(43));

    for t in chunk.tracks.values() {
        let cursor = session.engine.cursor(t.track_id).unwrap_or(0);
        println!(
            "{:>8} {:>8} {:>8} {:>7} {:>8}",
            t.track_id,
            t.window.start,
            t.window.end,
            t.records.len(),
            cursor,
        );
    }

    if session.engine.config().synchronized {
        println!();
        println!("Synchronized: one shared window, cursors unused");
    }
}
