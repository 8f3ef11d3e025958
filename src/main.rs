// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use calloop::{
    signals::{Signal, Signals},
    timer::{TimeoutAction, Timer},
    EventLoop,
};
use clap_lex::RawArgs;
use kms_sink::{
    backend::kms::{list_outputs, KmsBackend, KmsCard, KmsSink},
    config::{self, Command, Options},
    logger,
    playback::{FrameSource, Playback},
};
use tracing::{error, info, warn};

use std::{process, time::Duration};

#[cfg(feature = "profile-with-tracy")]
#[global_allocator]
static GLOBAL: profiling::tracy_client::ProfiledAllocator<std::alloc::System> =
    profiling::tracy_client::ProfiledAllocator::new(std::alloc::System, 10);

fn main() {
    if let Err(err) = main_inner() {
        error!("Error occured in main(): {:?}", err);
        process::exit(1);
    }
}

fn main_inner() -> Result<()> {
    let raw_args = RawArgs::from_args();
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");

    let command = config::parse_args(&raw_args, config::default_config_path());
    match command {
        Ok(Command::Help) => {
            print_help(env!("CARGO_PKG_VERSION"), git_hash);
            return Ok(());
        }
        Ok(Command::Version) => {
            println!(
                "kms-sink {} (git commit {})",
                env!("CARGO_PKG_VERSION"),
                git_hash
            );
            return Ok(());
        }
        _ => {}
    }

    // setup logger
    logger::init_logger()?;

    profiling::register_thread!("Main Thread");
    #[cfg(feature = "profile-with-tracy")]
    tracy_client::Client::start();

    match command? {
        Command::List(device) => {
            let card = KmsCard::open(&device)
                .with_context(|| format!("Failed to open {}", device.display()))?;
            print!("{}", list_outputs(&card)?);
            Ok(())
        }
        Command::Run(options) => run(options),
        Command::Help | Command::Version => Ok(()),
    }
}

fn print_help(version: &str, git_rev: &str) {
    println!(
        r#"kms-sink {version} (git commit {git_rev})

Shows raw XRGB8888 frames on a DRM/KMS display, double buffered.

Usage: kms-sink [OPTIONS]

Options:
  --device PATH        Display device [default: /dev/dri/card0]
  --plane ID           Show frames on this overlay plane
  --x N, --y N         Position on the plane's crtc
  --connector ID       Take over the crtc and drive this connector
  --mode NAME          Mode for the connector [default: preferred]
  --crtc ID            Crtc to use
  --width N            Frame width, the mode's width for crtc outputs
  --height N           Frame height, the mode's height for crtc outputs
  --framerate N[/D]    Frames per second, 0 to show frames as fast as possible [default: 30/1]
  --input PATH|-       Read packed frames from a file or stdin instead of showing a test pattern
  --frames N           Stop after N frames
  --config PATH        Config file [default: $XDG_CONFIG_HOME/kms-sink/config.ron]
  --list               List planes, crtcs, connectors and modes of the device
  -h, --help           Show this message
  -V, --version        Show the version of kms-sink"#
    );
}

fn run(options: Options) -> Result<()> {
    let mut sink = KmsSink::new(KmsBackend, options.sink.clone());
    sink.start()?;
    let caps = options.caps(sink.target())?;
    sink.set_caps(&caps)?;
    let source = FrameSource::open(&options.input, &caps)?;

    let mut event_loop =
        EventLoop::<State>::try_new().with_context(|| "Failed to initialize event loop")?;
    let loop_signal = event_loop.get_signal();
    let interval = caps.framerate.interval();

    let signal = loop_signal.clone();
    event_loop
        .handle()
        .insert_source(Timer::immediate(), move |deadline, _, state| {
            match state.playback.next() {
                Ok(true) => match interval {
                    Some(interval) => TimeoutAction::ToInstant(deadline + interval),
                    None => TimeoutAction::ToDuration(Duration::ZERO),
                },
                Ok(false) => {
                    signal.stop();
                    TimeoutAction::Drop
                }
                Err(err) => {
                    state.error = Some(err);
                    signal.stop();
                    TimeoutAction::Drop
                }
            }
        })
        .map_err(|err| err.error)
        .context("Failed to insert frame timer")?;

    let signal = loop_signal.clone();
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])
        .context("Failed to listen for signals")?;
    event_loop
        .handle()
        .insert_source(signals, move |event, _, _| {
            info!("Received {:?}, shutting down", event.signal());
            signal.stop();
        })
        .map_err(|err| err.error)
        .context("Failed to insert signal source")?;

    let mut state = State {
        playback: Playback::new(sink, source, &caps, options.frames),
        error: None,
    };
    info!(
        "Showing {}x{} frames at {}",
        caps.width, caps.height, caps.framerate
    );
    event_loop.run(None, &mut state, |_| {})?;

    let report = state.playback.stop();
    for err in &report.errors {
        warn!(?err, "Failed to clean up");
    }
    info!(
        "Showed {} frames, dropped {}",
        state.playback.shown(),
        state.playback.dropped()
    );
    match state.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct State {
    playback: Playback<KmsBackend>,
    error: Option<anyhow::Error>,
}
