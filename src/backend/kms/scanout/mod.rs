// SPDX-License-Identifier: GPL-3.0-only

use smithay::reexports::drm::control::framebuffer;

use std::fmt;

use super::{control::DisplayControl, device::OutputTarget, error::SinkError};

mod crtc;
mod plane;

pub use self::crtc::CrtcScanout;
pub use self::plane::PlaneScanout;

/// How frames reach the screen.
#[derive(Debug, Clone, PartialEq)]
pub enum Scanout<M> {
    Plane(PlaneScanout),
    Crtc(CrtcScanout<M>),
}

impl<M: Copy + PartialEq + fmt::Debug> Scanout<M> {
    /// `size` is the size of the buffers that will be submitted.
    pub fn new<D: DisplayControl<Mode = M>>(
        device: &D,
        target: &OutputTarget<M>,
        size: (u32, u32),
    ) -> Result<Scanout<M>, SinkError> {
        Ok(match target {
            OutputTarget::Plane {
                plane,
                crtc,
                position,
            } => Scanout::Plane(PlaneScanout::new(*plane, *crtc, *position, size)),
            OutputTarget::Crtc {
                connector,
                crtc,
                mode,
            } => Scanout::Crtc(CrtcScanout::new(device, *crtc, *connector, mode.mode)?),
        })
    }

    #[profiling::function]
    pub fn submit<D: DisplayControl<Mode = M>>(
        &mut self,
        device: &mut D,
        framebuffer: framebuffer::Handle,
    ) -> Result<(), SinkError> {
        match self {
            Scanout::Plane(plane) => plane.submit(device, framebuffer),
            Scanout::Crtc(crtc) => crtc.submit(device, framebuffer),
        }
    }

    pub fn teardown<D: DisplayControl<Mode = M>>(self, device: &mut D) -> Result<(), SinkError> {
        match self {
            Scanout::Plane(plane) => plane.teardown(device),
            Scanout::Crtc(crtc) => crtc.teardown(device),
        }
    }
}
