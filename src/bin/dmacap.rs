use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use image::error::{ImageError, ParameterError, ParameterErrorKind};
use image::{ImageFormat, RgbImage};
use tracing::{error, info, warn};
use tracing_subscriber::filter::{Directive, EnvFilter};

use dmacap::prelude::*;
use dmacap::{Flags, PixelLayout, StopHandle, Summary};
use dmacap::{DEFAULT_REGISTER_PATH, DEFAULT_STREAM_PATH};

fn cli() -> Command {
    Command::new("dmacap")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Capture frames from a DMA video capture card")
        .arg(
            Arg::new("count")
                .short('n')
                .long("count")
                .value_name("FRAMES")
                .help("Number of frames to capture")
                .value_parser(value_parser!(u64))
                .default_value("1"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PREFIX")
                .help("Output file prefix, frames are saved as <PREFIX>_<NNNN>.png")
                .default_value("frame"),
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .help("Enable the colour bar test pattern")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("interrupt")
                .short('i')
                .long("interrupt")
                .help("Synchronize to VSYNC events instead of polling")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("event")
                .long("event")
                .value_name("PATH")
                .help("Event device to try first in interrupt mode")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("delay")
                .short('d')
                .long("delay")
                .value_name("MS")
                .help("Delay before each frame in polling mode")
                .value_parser(value_parser!(u64))
                .default_value("20"),
        )
        .arg(
            Arg::new("chunk")
                .long("chunk")
                .value_name("BYTES")
                .help("Upper bound per read request (default: whole frame)")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("skip")
                .long("skip")
                .value_name("FRAMES")
                .help("Warm-up frames to discard before capturing")
                .value_parser(value_parser!(u32))
                .default_value("0"),
        )
        .arg(
            Arg::new("reset")
                .short('r')
                .long("reset")
                .help("Soft reset the capture core before enabling")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("align")
                .long("align")
                .help("Locate frame starts from the test pattern")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("span")
                .long("span")
                .value_name("FRAMES")
                .help("Frames read per aligned capture")
                .value_parser(value_parser!(usize))
                .default_value("3")
                .requires("align"),
        )
        .arg(
            Arg::new("save-raw")
                .long("save-raw")
                .help("Also save the unaligned start of each read as <PREFIX>_raw_<NNNN>.png")
                .action(ArgAction::SetTrue)
                .requires("align"),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Skip frames that cannot be located instead of guessing")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("device")
                .long("device")
                .value_name("PATH")
                .help("DMA stream device")
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_STREAM_PATH),
        )
        .arg(
            Arg::new("user")
                .long("user")
                .value_name("PATH")
                .help("Register device")
                .value_parser(value_parser!(PathBuf))
                .default_value(DEFAULT_REGISTER_PATH),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log per-frame diagnostics")
                .action(ArgAction::SetTrue),
        )
}

fn init_logging(verbose: bool) {
    let level = if verbose { "dmacap=debug" } else { "dmacap=info" };
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = level.parse::<Directive>() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn config_from(matches: &ArgMatches) -> CaptureConfig {
    let mut config = CaptureConfig::default();

    if let Some(path) = matches.get_one::<PathBuf>("device") {
        config.stream_path = path.clone();
    }
    if let Some(path) = matches.get_one::<PathBuf>("user") {
        config.register_path = path.clone();
    }
    config.event_path = matches.get_one::<PathBuf>("event").cloned();
    if matches.get_flag("interrupt") {
        config.sync = SyncMode::Interrupt;
    }
    if let Some(&ms) = matches.get_one::<u64>("delay") {
        config.poll_delay = Duration::from_millis(ms);
    }
    config.max_chunk = matches.get_one::<usize>("chunk").copied();
    if let Some(&frames) = matches.get_one::<u32>("skip") {
        config.warmup_frames = frames;
    }
    config.test_pattern = matches.get_flag("test");
    config.soft_reset = matches.get_flag("reset");
    if matches.get_flag("align") {
        let span = matches.get_one::<usize>("span").copied().unwrap_or(3);
        config.framing = Framing::Fiducial { span };
        config.keep_unaligned = matches.get_flag("save-raw");
    }
    if matches.get_flag("strict") {
        config.policy = Policy::Strict;
    }

    config
}

/// `<prefix>_<NNNN>.png`, numbered from the 1-based frame sequence
fn frame_path(prefix: &str, tag: Option<&str>, sequence: u64) -> PathBuf {
    match tag {
        Some(tag) => PathBuf::from(format!("{}_{}_{:04}.png", prefix, tag, sequence)),
        None => PathBuf::from(format!("{}_{:04}.png", prefix, sequence)),
    }
}

/// Writes whole rows of pixels as an RGB PNG
fn save_png(
    data: &[u8],
    width: u32,
    height: u32,
    layout: PixelLayout,
    path: &Path,
) -> image::ImageResult<()> {
    let rgb: Vec<u8> = data
        .chunks_exact(layout.bytes_per_pixel())
        .flat_map(|pixel| {
            let (r, g, b) = layout.rgb(pixel);
            [r, g, b]
        })
        .collect();

    let image = RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
        ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        ))
    })?;
    image.save_with_format(path, ImageFormat::Png)
}

/// Stops the session between frames on SIGINT, SIGTERM or SIGHUP
fn install_stop_handler(stop: StopHandle) {
    if let Err(err) = ctrlc::set_handler(move || {
        info!("stop requested, finishing the current frame");
        stop.stop();
    }) {
        warn!("failed to install the stop handler: {err}");
    }
}

fn capture(config: CaptureConfig, count: u64, prefix: &str) -> dmacap::Result<Summary> {
    info!("{}", config.geometry);
    let mut session = Session::open(config)?;

    install_stop_handler(session.stop_handle());
    session.start()?;

    let result = session.run(count, |frame| {
        if !frame.is_valid() {
            return ControlFlow::Continue(());
        }

        let sequence = frame.meta().sequence;
        if let Some(raw) = frame.unaligned() {
            let path = frame_path(prefix, Some("raw"), sequence);
            let rows = (raw.len() / frame.row_stride()) as u32;
            match save_png(raw, frame.width(), rows, frame.layout(), &path) {
                Ok(()) => info!("saved {} (unaligned)", path.display()),
                Err(e) => warn!("failed to save {}: {}", path.display(), e),
            }
        }

        let path = frame_path(prefix, None, sequence);
        if frame.meta().flags.contains(Flags::SHORT) {
            warn!(
                "saving incomplete frame {} with {} rows",
                sequence,
                frame.actual_height()
            );
        }
        let saved = save_png(
            frame.data(),
            frame.width(),
            frame.actual_height(),
            frame.layout(),
            &path,
        );
        match saved {
            Ok(()) => info!("saved {}", path.display()),
            Err(e) => warn!("failed to save {}: {}", path.display(), e),
        }

        ControlFlow::Continue(())
    });

    session.close();
    result
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    let count = matches.get_one::<u64>("count").copied().unwrap_or(1);
    let prefix = matches
        .get_one::<String>("output")
        .map(String::as_str)
        .unwrap_or("frame");
    let config = config_from(&matches);

    match capture(config, count, prefix) {
        Ok(summary) => {
            print!("{}", summary);
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
