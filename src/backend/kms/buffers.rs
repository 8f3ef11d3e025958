// SPDX-License-Identifier: GPL-3.0-only

use kms_sink_config::caps::BYTES_PER_PIXEL;
use smithay::reexports::drm::{buffer::Buffer, control::framebuffer};
use tracing::{debug, trace, warn};

use std::{fmt, io};

use super::{control::DisplayControl, error::SinkError};

/// Frames are double buffered.
pub const SCANOUT_BUFFERS: usize = 2;

/// A mapped, scanout capable buffer with a registered framebuffer.
pub struct ScanoutBuffer<D: DisplayControl> {
    backing: D::Buffer,
    mapping: D::Mapping,
    framebuffer: framebuffer::Handle,
}

impl<D: DisplayControl> fmt::Debug for ScanoutBuffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanoutBuffer")
            .field("framebuffer", &self.framebuffer)
            .field("size", &self.backing.size())
            .field("pitch", &self.backing.pitch())
            .finish_non_exhaustive()
    }
}

impl<D: DisplayControl> ScanoutBuffer<D> {
    fn allocate(device: &mut D, size: (u32, u32), index: usize) -> Result<Self, SinkError> {
        let backing = device
            .create_scanout_buffer(size)
            .map_err(|source| SinkError::BufferAllocationFailed { index, source })?;

        let min_pitch = size.0 * BYTES_PER_PIXEL;
        if backing.pitch() < min_pitch {
            let source = io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "pitch {} is smaller than a row of {} bytes",
                    backing.pitch(),
                    min_pitch
                ),
            );
            discard(device, backing, None, index);
            return Err(SinkError::BufferAllocationFailed { index, source });
        }

        let mapping = match device.map_buffer(&backing) {
            Ok(mapping) => mapping,
            Err(source) => {
                discard(device, backing, None, index);
                return Err(SinkError::BufferMapFailed { index, source });
            }
        };
        let expected = backing.pitch() as usize * size.1 as usize;
        if mapping.len() < expected {
            let source = io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "mapping of {} bytes cannot hold {} bytes",
                    mapping.len(),
                    expected
                ),
            );
            discard(device, backing, Some(mapping), index);
            return Err(SinkError::BufferMapFailed { index, source });
        }

        let framebuffer = match device.add_framebuffer(&backing) {
            Ok(framebuffer) => framebuffer,
            Err(source) => {
                discard(device, backing, Some(mapping), index);
                return Err(SinkError::FramebufferRegistrationFailed { index, source });
            }
        };

        debug!(
            index,
            ?framebuffer,
            pitch = backing.pitch(),
            "Allocated {}x{} scanout buffer",
            size.0,
            size.1
        );
        Ok(ScanoutBuffer {
            backing,
            mapping,
            framebuffer,
        })
    }

    fn release(self, device: &mut D, index: usize, errors: &mut Vec<SinkError>) {
        let ScanoutBuffer {
            backing,
            mapping,
            framebuffer,
        } = self;

        let mut check = |result: io::Result<()>| {
            if let Err(source) = result {
                warn!(?source, index, "Failed to release scanout buffer");
                errors.push(SinkError::BufferReleaseFailed { index, source });
            }
        };
        check(device.unmap_buffer(mapping));
        check(device.destroy_buffer(backing));
        check(device.remove_framebuffer(framebuffer));
        trace!(index, "Released scanout buffer");
    }

    pub fn framebuffer(&self) -> framebuffer::Handle {
        self.framebuffer
    }

    pub fn pitch(&self) -> u32 {
        self.backing.pitch()
    }

    pub fn size(&self) -> (u32, u32) {
        self.backing.size()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.mapping
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.mapping
    }
}

// Undo a half built buffer. Failures here only get logged, the caller already
// reports the error that got us here.
fn discard<D: DisplayControl>(
    device: &mut D,
    backing: D::Buffer,
    mapping: Option<D::Mapping>,
    index: usize,
) {
    if let Some(mapping) = mapping {
        if let Err(err) = device.unmap_buffer(mapping) {
            warn!(?err, index, "Failed to unmap scanout buffer");
        }
    }
    if let Err(err) = device.destroy_buffer(backing) {
        warn!(?err, index, "Failed to destroy scanout buffer");
    }
}

/// The two buffers frames alternate between.
pub struct BufferPool<D: DisplayControl> {
    buffers: [ScanoutBuffer<D>; SCANOUT_BUFFERS],
}

impl<D: DisplayControl> fmt::Debug for BufferPool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffers", &self.buffers)
            .finish()
    }
}

impl<D: DisplayControl> BufferPool<D> {
    /// Build both buffers. Nothing is left allocated if this fails.
    pub fn allocate(device: &mut D, size: (u32, u32)) -> Result<Self, SinkError> {
        let front = ScanoutBuffer::allocate(device, size, 0)?;
        let back = match ScanoutBuffer::allocate(device, size, 1) {
            Ok(buffer) => buffer,
            Err(err) => {
                let mut ignored = Vec::new();
                front.release(device, 0, &mut ignored);
                return Err(err);
            }
        };

        Ok(BufferPool {
            buffers: [front, back],
        })
    }

    pub fn buffer(&self, index: usize) -> &ScanoutBuffer<D> {
        &self.buffers[index % SCANOUT_BUFFERS]
    }

    pub fn buffer_mut(&mut self, index: usize) -> &mut ScanoutBuffer<D> {
        &mut self.buffers[index % SCANOUT_BUFFERS]
    }

    pub fn size(&self) -> (u32, u32) {
        self.buffers[0].size()
    }

    /// Release both buffers, last one first.
    ///
    /// Every step is attempted, failures are collected.
    pub fn release(self, device: &mut D) -> Vec<SinkError> {
        let mut errors = Vec::new();
        for (index, buffer) in self.buffers.into_iter().enumerate().rev() {
            buffer.release(device, index, &mut errors);
        }
        errors
    }
}
