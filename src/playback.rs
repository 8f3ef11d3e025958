// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use kms_sink_config::caps::VideoCaps;
use tracing::{debug, warn};

use std::{
    fs::File,
    io::{self, BufReader, Read},
};

use crate::{
    backend::kms::{DisplayBackend, KmsSink, SinkError, TeardownReport},
    config::FrameInput,
};

/// Feeds frames from a [`FrameSource`] into a started and configured sink.
pub struct Playback<B: DisplayBackend> {
    sink: KmsSink<B>,
    source: FrameSource,
    frame: Vec<u8>,
    shown: u64,
    dropped: u64,
    limit: Option<u64>,
}

impl<B: DisplayBackend> Playback<B> {
    pub fn new(
        sink: KmsSink<B>,
        source: FrameSource,
        caps: &VideoCaps,
        limit: Option<u64>,
    ) -> Playback<B> {
        Playback {
            sink,
            source,
            frame: vec![0; caps.frame_len()],
            shown: 0,
            dropped: 0,
            limit,
        }
    }

    /// Frames that made it to the screen.
    pub fn shown(&self) -> u64 {
        self.shown
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Show the next frame, `false` once there are none left.
    pub fn next(&mut self) -> Result<bool> {
        if self.limit.is_some_and(|limit| self.shown >= limit) {
            debug!("Reached frame limit");
            return Ok(false);
        }
        if !self.source.next_frame(&mut self.frame)? {
            debug!("End of input");
            return Ok(false);
        }

        let res = if self.shown == 0 {
            self.sink.preroll(&self.frame)
        } else {
            self.sink.render(&self.frame)
        };
        match res {
            Ok(()) => {
                self.shown += 1;
                profiling::finish_frame!();
            }
            // the frame is dropped, the next one may make it
            Err(err @ SinkError::ScanoutSubmitFailed(_)) => {
                warn!(?err, "Dropped frame");
                self.dropped += 1;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(true)
    }

    pub fn stop(&mut self) -> TeardownReport {
        self.sink.stop()
    }
}

pub enum FrameSource {
    Reader(Box<dyn Read>),
    Pattern { width: usize, height: usize, n: u32 },
}

impl FrameSource {
    pub fn open(input: &FrameInput, caps: &VideoCaps) -> Result<FrameSource> {
        Ok(match input {
            FrameInput::Stdin => FrameSource::Reader(Box::new(BufReader::new(io::stdin()))),
            FrameInput::File(path) => FrameSource::Reader(Box::new(BufReader::new(
                File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
            ))),
            FrameInput::Pattern => FrameSource::Pattern {
                width: caps.width as usize,
                height: caps.height as usize,
                n: 0,
            },
        })
    }

    fn next_frame(&mut self, frame: &mut [u8]) -> Result<bool> {
        match self {
            FrameSource::Reader(reader) => match reader.read_exact(frame) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
                Err(err) => Err(err).context("Failed to read frame"),
            },
            FrameSource::Pattern { width, height, n } => {
                let pixels = test_pattern(*width, *height, *n);
                frame.copy_from_slice(bytemuck::cast_slice(pixels.as_slice()));
                *n = n.wrapping_add(1);
                Ok(true)
            }
        }
    }
}

const BARS: [u32; 8] = [
    0xffffff, 0xffff00, 0x00ffff, 0x00ff00, 0xff00ff, 0xff0000, 0x0000ff, 0x000000,
];

/// Color bars scrolling to the left, as XRGB8888.
fn test_pattern(width: usize, height: usize, n: u32) -> Vec<u32> {
    let bar_width = (width / BARS.len()).max(1);
    let shift = n as usize % width.max(1);
    let row = (0..width)
        .map(|x| BARS[((x + shift) / bar_width) % BARS.len()].to_le())
        .collect::<Vec<_>>();
    row.repeat(height)
}
