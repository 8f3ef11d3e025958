// SPDX-License-Identifier: GPL-3.0-only

//! Command line handling.
//!
//! Settings come from, in increasing priority: built-in defaults, a RON config
//! file (`--config`, or `kms-sink/config.ron` in the XDG config dirs) and the
//! command line.

use anyhow::{bail, Context, Result};
use clap_lex::{ArgCursor, RawArgs};
use kms_sink_config::{
    caps::{Fraction, VideoCaps},
    load_config, OutputConfig, SinkConfig, DEFAULT_MODE,
};
use tracing::debug;

use std::{ffi::OsStr, path::PathBuf, str::FromStr};

use crate::backend::kms::OutputTarget;

pub const CONFIG_FILE: &str = "kms-sink/config.ron";
pub const DEFAULT_FRAMERATE: Fraction = Fraction::new(30, 1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Version,
    /// Print the outputs of a device
    List(PathBuf),
    Run(Options),
}

/// Where frames are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameInput {
    Stdin,
    File(PathBuf),
    /// Generated test pattern
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub sink: SinkConfig,
    /// Frame size, taken from the mode for crtc outputs when missing
    pub size: Option<(u32, u32)>,
    pub framerate: Fraction,
    pub input: FrameInput,
    /// Stop after this many frames
    pub frames: Option<u64>,
}

impl Options {
    /// Caps for incoming frames, once the output is resolved.
    pub fn caps<M>(&self, target: Option<&OutputTarget<M>>) -> Result<VideoCaps> {
        let size = match (self.size, target) {
            (Some(size), _) => size,
            (None, Some(OutputTarget::Crtc { mode, .. })) => mode.size(),
            (None, _) => bail!("--width and --height are required for plane outputs"),
        };
        let caps = VideoCaps::new(size.0, size.1, self.framerate);
        caps.validate()?;
        Ok(caps)
    }
}

/// Values given on the command line.
#[derive(Debug, Default)]
struct Overrides {
    device: Option<PathBuf>,
    plane: Option<u32>,
    connector: Option<u32>,
    crtc: Option<u32>,
    x: Option<u32>,
    y: Option<u32>,
    mode: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    framerate: Option<Fraction>,
    input: Option<FrameInput>,
    frames: Option<u64>,
    config: Option<PathBuf>,
    list: bool,
}

impl Overrides {
    fn apply(self, mut config: SinkConfig) -> Result<SinkConfig> {
        if let Some(device) = self.device {
            config.device = device;
        }
        let crtc = self.crtc.unwrap_or(config.output.crtc());

        let plane_output = match (self.plane, self.connector, &config.output) {
            (Some(_), Some(_), _) => bail!("--plane and --connector can't be combined"),
            (Some(plane), None, _) => Some(plane),
            (None, Some(_), _) => None,
            (None, None, OutputConfig::Plane { plane, .. }) => Some(*plane),
            (None, None, OutputConfig::Crtc { .. }) => None,
        };

        config.output = match (plane_output, config.output) {
            (Some(plane), output) => {
                if self.mode.is_some() {
                    bail!("--mode only applies to crtc outputs");
                }
                let (x, y) = match output {
                    OutputConfig::Plane { x, y, .. } => (x, y),
                    OutputConfig::Crtc { .. } => (0, 0),
                };
                OutputConfig::Plane {
                    plane,
                    crtc,
                    x: self.x.unwrap_or(x),
                    y: self.y.unwrap_or(y),
                }
            }
            (None, output) => {
                if self.x.is_some() || self.y.is_some() {
                    bail!("--x and --y only apply to plane outputs");
                }
                let (connector, mode) = match output {
                    OutputConfig::Crtc {
                        connector, mode, ..
                    } => (connector, mode),
                    OutputConfig::Plane { .. } => (0, String::from(DEFAULT_MODE)),
                };
                OutputConfig::Crtc {
                    connector: self.connector.unwrap_or(connector),
                    crtc,
                    mode: self.mode.unwrap_or(mode),
                }
            }
        };

        config.validate()?;
        Ok(config)
    }
}

/// The config file used without `--config`, if there is one.
pub fn default_config_path() -> Option<PathBuf> {
    xdg::BaseDirectories::new()
        .ok()
        .and_then(|base| base.find_config_file(CONFIG_FILE))
}

fn value<'a>(
    name: &str,
    inline: Option<&'a OsStr>,
    raw: &'a RawArgs,
    cursor: &mut ArgCursor,
) -> Result<&'a str> {
    inline
        .or_else(|| raw.next_os(cursor))
        .with_context(|| format!("--{} needs a value", name))?
        .to_str()
        .with_context(|| format!("The value of --{} is not valid UTF-8", name))
}

fn parse<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Invalid value {:?} for --{}", value, name))
}

/// Parse the command line, skipping the binary name.
///
/// `default_config` is read when no `--config` is given.
pub fn parse_args(raw: &RawArgs, default_config: Option<PathBuf>) -> Result<Command> {
    let mut cursor = raw.cursor();
    let _ = raw.next(&mut cursor);
    let mut overrides = Overrides::default();

    while let Some(arg) = raw.next(&mut cursor) {
        if let Some((long, inline)) = arg.to_long() {
            let name = match long {
                Ok(name) => name,
                Err(name) => bail!("Unknown argument --{}", name.to_string_lossy()),
            };
            let mut value = || value(name, inline, raw, &mut cursor);
            match name {
                "help" => return Ok(Command::Help),
                "version" => return Ok(Command::Version),
                "list" => overrides.list = true,
                "device" => overrides.device = Some(PathBuf::from(value()?)),
                "config" => overrides.config = Some(PathBuf::from(value()?)),
                "plane" => overrides.plane = Some(parse(name, value()?)?),
                "connector" => overrides.connector = Some(parse(name, value()?)?),
                "crtc" => overrides.crtc = Some(parse(name, value()?)?),
                "x" => overrides.x = Some(parse(name, value()?)?),
                "y" => overrides.y = Some(parse(name, value()?)?),
                "mode" => overrides.mode = Some(value()?.to_string()),
                "width" => overrides.width = Some(parse(name, value()?)?),
                "height" => overrides.height = Some(parse(name, value()?)?),
                "framerate" => overrides.framerate = Some(parse(name, value()?)?),
                "frames" => overrides.frames = Some(parse(name, value()?)?),
                "input" => {
                    overrides.input = Some(match value()? {
                        "-" => FrameInput::Stdin,
                        path => FrameInput::File(PathBuf::from(path)),
                    })
                }
                _ => bail!("Unknown argument --{}", name),
            }
        } else if let Some(mut shorts) = arg.to_short() {
            while let Some(short) = shorts.next_flag() {
                match short {
                    Ok('h') => return Ok(Command::Help),
                    Ok('V') => return Ok(Command::Version),
                    Ok(other) => bail!("Unknown argument -{}", other),
                    Err(other) => bail!("Unknown argument -{}", other.to_string_lossy()),
                }
            }
        } else {
            bail!(
                "Unexpected argument {:?}",
                arg.to_value_os().to_string_lossy()
            );
        }
    }

    let file = overrides.config.clone().or(default_config);
    let base = match file {
        Some(path) => {
            debug!("Using config at {}", path.display());
            load_config(&path)?
        }
        None => SinkConfig::default(),
    };

    if overrides.list {
        return Ok(Command::List(overrides.device.unwrap_or(base.device)));
    }

    let size = match (overrides.width, overrides.height) {
        (Some(width), Some(height)) => Some((width, height)),
        (None, None) => None,
        _ => bail!("--width and --height have to be given together"),
    };
    let framerate = overrides.framerate.unwrap_or(DEFAULT_FRAMERATE);
    let input = overrides.input.take().unwrap_or(FrameInput::Pattern);
    let frames = overrides.frames;
    let sink = overrides.apply(base)?;

    Ok(Command::Run(Options {
        sink,
        size,
        framerate,
        input,
        frames,
    }))
}
