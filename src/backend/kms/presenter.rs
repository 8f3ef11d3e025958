// SPDX-License-Identifier: GPL-3.0-only

use kms_sink_config::caps::BYTES_PER_PIXEL;
use tracing::trace;

use super::{buffers::BufferPool, control::DisplayControl, error::SinkError, scanout::Scanout};

/// Copy `rows` rows of `row_bytes` each between buffers with different strides.
///
/// Bytes past `row_bytes` in each destination row are left alone.
pub fn copy_frame(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) {
    debug_assert!(row_bytes <= src_stride && row_bytes <= dst_stride);
    if row_bytes == 0 {
        return;
    }
    if src_stride == dst_stride && src_stride == row_bytes {
        let len = row_bytes * rows;
        dst[..len].copy_from_slice(&src[..len]);
        return;
    }
    for (src_row, dst_row) in src
        .chunks(src_stride)
        .zip(dst.chunks_mut(dst_stride))
        .take(rows)
    {
        dst_row[..row_bytes].copy_from_slice(&src_row[..row_bytes]);
    }
}

/// Copies frames into the buffer that is not on screen and flips between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presenter {
    current: usize,
    frame_size: (u32, u32),
}

impl Presenter {
    /// `frame_size` is the size of incoming, tightly packed frames.
    pub fn new(frame_size: (u32, u32)) -> Presenter {
        Presenter {
            current: 0,
            frame_size,
        }
    }

    /// Index of the buffer the next frame is written to.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn frame_len(&self) -> usize {
        self.frame_size.0 as usize * self.frame_size.1 as usize * BYTES_PER_PIXEL as usize
    }

    #[profiling::function]
    pub fn present<D: DisplayControl>(
        &mut self,
        device: &mut D,
        pool: &mut BufferPool<D>,
        scanout: &mut Scanout<D::Mode>,
        frame: &[u8],
    ) -> Result<(), SinkError> {
        let expected = self.frame_len();
        if frame.len() < expected {
            return Err(SinkError::UndersizedFrame {
                len: frame.len(),
                expected,
            });
        }

        let buffer = pool.buffer_mut(self.current);
        let (width, height) = buffer.size();
        let src_stride = (self.frame_size.0 * BYTES_PER_PIXEL) as usize;
        let row_bytes = (self.frame_size.0.min(width) * BYTES_PER_PIXEL) as usize;
        let rows = self.frame_size.1.min(height) as usize;
        let dst_stride = buffer.pitch() as usize;
        {
            profiling::scope!("copy_frame");
            copy_frame(
                frame,
                src_stride,
                buffer.pixels_mut(),
                dst_stride,
                row_bytes,
                rows,
            );
        }

        let framebuffer = buffer.framebuffer();
        scanout.submit(device, framebuffer)?;
        trace!(index = self.current, ?framebuffer, "Presented frame");
        self.current ^= 1;
        Ok(())
    }
}
