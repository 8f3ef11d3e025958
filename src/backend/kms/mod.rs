// SPDX-License-Identifier: GPL-3.0-only

//! Double buffered output of raw frames through DRM/KMS.
//!
//! A [`KmsSink`] goes through `Idle -> Opened -> Configured -> Streaming`:
//! [`KmsSink::start`] opens the device and resolves the configured output,
//! [`KmsSink::set_caps`] allocates the two scanout buffers once the frame size is
//! known and [`KmsSink::render`] shows frames. [`KmsSink::stop`] returns to `Idle`
//! from anywhere, releasing exactly what was acquired.

use kms_sink_config::{caps::VideoCaps, SinkConfig};
use tracing::{debug, info, warn};

use std::fmt;

pub mod buffers;
pub mod card;
pub mod control;
pub mod device;
mod drm_helpers;
pub mod error;
pub mod presenter;
pub mod scanout;
#[cfg(test)]
pub mod testing;

pub use self::card::{KmsBackend, KmsCard};
pub use self::control::{DisplayBackend, DisplayControl};
pub use self::device::{list_outputs, OutputListing, OutputTarget};
pub use self::error::{MissingTarget, SinkError};

use self::{
    buffers::{BufferPool, ScanoutBuffer},
    presenter::Presenter,
    scanout::Scanout,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    /// Device open and output resolved
    Opened,
    /// Buffers allocated
    Configured,
    /// At least one frame shown
    Streaming,
}

/// Non-fatal failures collected while stopping.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub errors: Vec<SinkError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

// Everything that only exists once caps are known.
struct Output<D: DisplayControl> {
    pool: BufferPool<D>,
    scanout: Scanout<D::Mode>,
    presenter: Presenter,
    streaming: bool,
}

struct Session<D: DisplayControl> {
    device: D,
    target: OutputTarget<D::Mode>,
    output: Option<Output<D>>,
}

pub struct KmsSink<B: DisplayBackend> {
    backend: B,
    config: SinkConfig,
    session: Option<Session<B::Device>>,
    // buffers get set up at most once per sink, stop does not reset this
    configured: bool,
}

impl<B: DisplayBackend> fmt::Debug for KmsSink<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsSink")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("current_index", &self.current_index())
            .finish_non_exhaustive()
    }
}

impl<B: DisplayBackend> KmsSink<B> {
    pub fn new(backend: B, config: SinkConfig) -> KmsSink<B> {
        KmsSink {
            backend,
            config,
            session: None,
            configured: false,
        }
    }

    pub fn state(&self) -> LifecycleState {
        match &self.session {
            None => LifecycleState::Idle,
            Some(Session { output: None, .. }) => LifecycleState::Opened,
            Some(Session {
                output: Some(output),
                ..
            }) if output.streaming => LifecycleState::Streaming,
            Some(_) => LifecycleState::Configured,
        }
    }

    fn invalid(&self, operation: &'static str) -> SinkError {
        SinkError::InvalidState {
            operation,
            state: self.state(),
        }
    }

    pub fn target(&self) -> Option<&OutputTarget<<B::Device as DisplayControl>::Mode>> {
        self.session.as_ref().map(|session| &session.target)
    }

    /// Index of the buffer the next frame goes to.
    pub fn current_index(&self) -> Option<usize> {
        self.output().map(|output| output.presenter.current())
    }

    pub fn buffer(&self, index: usize) -> Option<&ScanoutBuffer<B::Device>> {
        self.output().map(|output| output.pool.buffer(index))
    }

    /// Size of the allocated scanout buffers.
    pub fn buffer_size(&self) -> Option<(u32, u32)> {
        self.output().map(|output| output.pool.size())
    }

    fn output(&self) -> Option<&Output<B::Device>> {
        self.session
            .as_ref()
            .and_then(|session| session.output.as_ref())
    }

    /// Open the device, prepare its buffer allocator and resolve the configured
    /// output.
    ///
    /// Nothing is kept open if this fails. A sink that was configured once
    /// cannot be started again after [`KmsSink::stop`].
    pub fn start(&mut self) -> Result<(), SinkError> {
        if self.session.is_some() || self.configured {
            return Err(self.invalid("start"));
        }

        let mut device = device::open_device(&self.backend, &self.config.device)?;
        device
            .init_allocator()
            .map_err(SinkError::AllocatorInitFailed)?;
        let target = match device::resolve_target(&device, &self.config.output) {
            Ok(target) => target,
            Err(err) => {
                device.release_allocator();
                return Err(err);
            }
        };
        info!("Opened {}", self.config.device.display());

        self.session = Some(Session {
            device,
            target,
            output: None,
        });
        Ok(())
    }

    /// Allocate buffers for frames described by `caps`.
    ///
    /// Only the first call after [`KmsSink::start`] does anything.
    pub fn set_caps(&mut self, caps: &VideoCaps) -> Result<(), SinkError> {
        let state = self.state();
        let Some(session) = self.session.as_mut() else {
            return Err(SinkError::InvalidState {
                operation: "set caps",
                state,
            });
        };
        if session.output.is_some() {
            debug!("Already configured, ignoring caps {:?}", caps.size());
            return Ok(());
        }
        caps.validate()?;

        let size = match &session.target {
            OutputTarget::Plane { .. } => caps.size(),
            OutputTarget::Crtc { mode, .. } => {
                // the mode decides what gets scanned out, frames get clipped or padded
                if mode.size() != caps.size() {
                    warn!(
                        "Frame size {:?} does not match mode {} {:?}, frames will be clipped",
                        caps.size(),
                        mode.name,
                        mode.size()
                    );
                }
                mode.size()
            }
        };

        let mut pool = BufferPool::allocate(&mut session.device, size)?;
        let scanout = match Scanout::new(&session.device, &session.target, size) {
            Ok(scanout) => scanout,
            Err(err) => {
                for err in pool.release(&mut session.device) {
                    warn!(?err, "Failed to release scanout buffers");
                }
                return Err(err);
            }
        };
        // clear both buffers, so clipped frames don't show garbage
        for index in 0..buffers::SCANOUT_BUFFERS {
            pool.buffer_mut(index).pixels_mut().fill(0);
        }

        info!(
            width = size.0,
            height = size.1,
            framerate = %caps.framerate,
            "Configured scanout"
        );
        self.configured = true;
        session.output = Some(Output {
            pool,
            scanout,
            presenter: Presenter::new(caps.size()),
            streaming: false,
        });
        Ok(())
    }

    /// Show `frame`, a tightly packed frame of the configured size.
    ///
    /// On failure the frame is dropped and the sink is left as it was.
    pub fn render(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        let state = self.state();
        let Some(Session {
            device,
            output: Some(output),
            ..
        }) = self.session.as_mut()
        else {
            return Err(SinkError::InvalidState {
                operation: "render",
                state,
            });
        };

        output
            .presenter
            .present(device, &mut output.pool, &mut output.scanout, frame)?;
        if !output.streaming {
            debug!("First frame presented");
            output.streaming = true;
        }
        Ok(())
    }

    /// Show the first frame before playback starts.
    pub fn preroll(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        self.render(frame)
    }

    /// Restore the display and release everything, in reverse order of setup.
    ///
    /// Every step runs even if earlier ones fail.
    pub fn stop(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        let Some(Session {
            mut device,
            output,
            ..
        }) = self.session.take()
        else {
            return report;
        };

        if let Some(Output { pool, scanout, .. }) = output {
            if let Err(err) = scanout.teardown(&mut device) {
                warn!(?err, "Failed to reset scanout");
                report.errors.push(err);
            }
            report.errors.extend(pool.release(&mut device));
        }
        device.release_allocator();
        drop(device);

        if report.is_clean() {
            info!("Stopped");
        } else {
            warn!("Stopped with {} error(s)", report.errors.len());
        }
        report
    }
}

impl<B: DisplayBackend> Drop for KmsSink<B> {
    fn drop(&mut self) {
        if self.session.is_some() {
            let report = self.stop();
            for err in report.errors {
                warn!(?err, "Teardown failure while dropping sink");
            }
        }
    }
}
