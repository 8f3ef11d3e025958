// SPDX-License-Identifier: GPL-3.0-only

//! The one raw video format the sink accepts.
//!
//! Frames are 32 bits per pixel, 24 bits of color depth, described as big endian
//! words with red in bits 8..16, green in 16..24 and blue in 24..32. In memory that
//! is `B, G, R, x`, which is what a little endian `XRGB8888` scanout buffer expects,
//! so frames can be copied without any conversion.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

pub const MIN_DIMENSION: u32 = 16;
pub const MAX_DIMENSION: u32 = 4096;
pub const MAX_FRAMERATE: u32 = 30;

pub const BITS_PER_PIXEL: u32 = 32;
pub const BYTES_PER_PIXEL: u32 = BITS_PER_PIXEL / 8;
pub const DEPTH: u32 = 24;
pub const BIG_ENDIAN: u32 = 4321;
pub const RED_MASK: u32 = 0x0000_ff00;
pub const GREEN_MASK: u32 = 0x00ff_0000;
pub const BLUE_MASK: u32 = 0xff00_0000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapsError {
    #[error("{axis} of {value} is outside of {min}..={max}", min = MIN_DIMENSION, max = MAX_DIMENSION)]
    Dimension { axis: &'static str, value: u32 },
    #[error("Framerate {0} is outside of 0/1..={max}/1", max = MAX_FRAMERATE)]
    Framerate(Fraction),
    #[error("Unsupported pixel layout (bpp {bpp}, depth {depth}, endianness {endianness})")]
    Layout { bpp: u32, depth: u32, endianness: u32 },
    #[error("Unsupported channel masks r={red:#010x} g={green:#010x} b={blue:#010x}")]
    Masks { red: u32, green: u32, blue: u32 },
    #[error("Invalid fraction {0:?}")]
    Fraction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction {
    pub num: u32,
    pub den: u32,
}

impl Fraction {
    pub const fn new(num: u32, den: u32) -> Fraction {
        Fraction { num, den }
    }

    /// Time between two frames, `None` for a variable (zero) rate.
    pub fn interval(&self) -> Option<Duration> {
        if self.num == 0 || self.den == 0 {
            return None;
        }
        Some(Duration::from_nanos(
            self.den as u64 * 1_000_000_000 / self.num as u64,
        ))
    }

    fn in_range(&self) -> bool {
        // compare num/den <= MAX/1 without floats
        self.den != 0 && self.num as u64 <= MAX_FRAMERATE as u64 * self.den as u64
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Fraction {
    type Err = CapsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CapsError::Fraction(s.to_string());
        let (num, den) = match s.split_once('/') {
            Some((num, den)) => (num, den),
            None => (s, "1"),
        };
        let num = num.trim().parse().map_err(|_| invalid())?;
        let den = den.trim().parse().map_err(|_| invalid())?;
        if den == 0 {
            return Err(invalid());
        }
        Ok(Fraction { num, den })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCaps {
    pub width: u32,
    pub height: u32,
    pub framerate: Fraction,
    pub bpp: u32,
    pub depth: u32,
    pub endianness: u32,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
}

impl VideoCaps {
    /// Caps in the accepted pixel layout.
    pub fn new(width: u32, height: u32, framerate: Fraction) -> VideoCaps {
        VideoCaps {
            width,
            height,
            framerate,
            bpp: BITS_PER_PIXEL,
            depth: DEPTH,
            endianness: BIG_ENDIAN,
            red_mask: RED_MASK,
            green_mask: GREEN_MASK,
            blue_mask: BLUE_MASK,
        }
    }

    pub fn validate(&self) -> Result<(), CapsError> {
        for (axis, value) in [("width", self.width), ("height", self.height)] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
                return Err(CapsError::Dimension { axis, value });
            }
        }
        if !self.framerate.in_range() {
            return Err(CapsError::Framerate(self.framerate));
        }
        if self.bpp != BITS_PER_PIXEL || self.depth != DEPTH || self.endianness != BIG_ENDIAN {
            return Err(CapsError::Layout {
                bpp: self.bpp,
                depth: self.depth,
                endianness: self.endianness,
            });
        }
        if (self.red_mask, self.green_mask, self.blue_mask) != (RED_MASK, GREEN_MASK, BLUE_MASK) {
            return Err(CapsError::Masks {
                red: self.red_mask,
                green: self.green_mask,
                blue: self.blue_mask,
            });
        }
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes of one tightly packed frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL as usize
    }
}
