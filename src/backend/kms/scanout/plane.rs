// SPDX-License-Identifier: GPL-3.0-only

use smithay::{
    reexports::drm::control::{crtc, framebuffer, plane},
    utils::{Physical, Rectangle},
};
use tracing::debug;

use crate::backend::kms::{control::DisplayControl, error::SinkError};

/// Shows frames on an overlay plane, leaving the crtc mode alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneScanout {
    plane: plane::Handle,
    crtc: crtc::Handle,
    position: (u32, u32),
    size: (u32, u32),
}

impl PlaneScanout {
    pub fn new(
        plane: plane::Handle,
        crtc: crtc::Handle,
        position: (u32, u32),
        size: (u32, u32),
    ) -> PlaneScanout {
        PlaneScanout {
            plane,
            crtc,
            position,
            size,
        }
    }

    fn destination(&self) -> Rectangle<i32, Physical> {
        Rectangle::new(
            (self.position.0 as i32, self.position.1 as i32).into(),
            (self.size.0 as i32, self.size.1 as i32).into(),
        )
    }

    pub fn submit<D: DisplayControl>(
        &mut self,
        device: &mut D,
        framebuffer: framebuffer::Handle,
    ) -> Result<(), SinkError> {
        let (w, h) = self.size;
        device
            .set_plane(
                self.plane,
                self.crtc,
                Some(framebuffer),
                self.destination(),
                (0, 0, w << 16, h << 16),
            )
            .map_err(SinkError::ScanoutSubmitFailed)
    }

    /// Detach the plane from its crtc and framebuffer.
    pub fn teardown<D: DisplayControl>(self, device: &mut D) -> Result<(), SinkError> {
        device
            .set_plane(
                self.plane,
                self.crtc,
                None,
                Rectangle::from_size((0, 0).into()),
                (0, 0, 0, 0),
            )
            .map_err(SinkError::ScanoutDisableFailed)?;
        debug!(plane = u32::from(self.plane), "Disabled overlay plane");
        Ok(())
    }
}
