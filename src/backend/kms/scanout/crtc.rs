// SPDX-License-Identifier: GPL-3.0-only

use smithay::reexports::drm::control::{connector, crtc, framebuffer};
use tracing::{debug, info, trace};

use crate::backend::kms::{
    control::{CrtcState, DisplayControl},
    error::SinkError,
};

/// Owns a whole crtc: modesets on the first frame, flips afterwards and puts
/// back whatever was shown before on teardown.
#[derive(Debug, Clone, PartialEq)]
pub struct CrtcScanout<M> {
    crtc: crtc::Handle,
    connector: connector::Handle,
    mode: M,
    saved: CrtcState<M>,
    modeset_done: bool,
}

impl<M: Copy + PartialEq + std::fmt::Debug> CrtcScanout<M> {
    /// Snapshot the current crtc configuration.
    pub fn new<D: DisplayControl<Mode = M>>(
        device: &D,
        crtc: crtc::Handle,
        connector: connector::Handle,
        mode: M,
    ) -> Result<CrtcScanout<M>, SinkError> {
        let saved = device
            .crtc_state(crtc)
            .map_err(|source| SinkError::EnumerationFailed {
                what: "crtc state",
                source,
            })?;
        debug!(
            crtc = u32::from(crtc),
            mode = ?saved.mode,
            framebuffer = ?saved.framebuffer,
            "Saved crtc state"
        );

        Ok(CrtcScanout {
            crtc,
            connector,
            mode,
            saved,
            modeset_done: false,
        })
    }

    pub fn submit<D: DisplayControl<Mode = M>>(
        &mut self,
        device: &mut D,
        framebuffer: framebuffer::Handle,
    ) -> Result<(), SinkError> {
        if self.modeset_done {
            device
                .flip_crtc(self.crtc, framebuffer)
                .map_err(SinkError::ScanoutSubmitFailed)?;
        } else {
            device
                .set_crtc(
                    self.crtc,
                    Some(framebuffer),
                    (0, 0),
                    &[self.connector],
                    Some(self.mode),
                )
                .map_err(SinkError::ScanoutSubmitFailed)?;
            self.modeset_done = true;
            info!(crtc = u32::from(self.crtc), mode = ?self.mode, "Mode set");
        }

        // plenty of drivers don't implement dirty
        if let Err(err) = device.dirty_framebuffer(framebuffer) {
            trace!(?err, "Framebuffer dirty notification failed");
        }
        Ok(())
    }

    /// Restore the snapshot taken in [`CrtcScanout::new`].
    pub fn teardown<D: DisplayControl<Mode = M>>(self, device: &mut D) -> Result<(), SinkError> {
        let CrtcState {
            mode,
            framebuffer,
            position,
            ..
        } = self.saved;

        match (mode, framebuffer) {
            (Some(mode), Some(framebuffer)) => {
                device
                    .set_crtc(
                        self.crtc,
                        Some(framebuffer),
                        position,
                        &[self.connector],
                        Some(mode),
                    )
                    .map_err(SinkError::RestoreModeFailed)?;
                debug!(crtc = u32::from(self.crtc), "Restored previous crtc state");
            }
            // nothing was shown before, so turn it back off
            _ if self.modeset_done => {
                device
                    .set_crtc(self.crtc, None, (0, 0), &[], None)
                    .map_err(SinkError::RestoreModeFailed)?;
                debug!(crtc = u32::from(self.crtc), "Disabled crtc");
            }
            _ => {}
        }
        Ok(())
    }
}
