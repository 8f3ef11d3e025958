// SPDX-License-Identifier: GPL-3.0-only

use kms_sink_config::caps::CapsError;
use std::{io, path::PathBuf};

use super::LifecycleState;

/// A configured object that the device does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingTarget {
    Plane(u32),
    Crtc(u32),
    Connector(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to open display device {}", path.display())]
    DeviceOpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to enumerate {what}")]
    EnumerationFailed {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{0:?} does not exist on this device")]
    TargetNotFound(MissingTarget),
    #[error("Connector {connector} has no mode {name:?}")]
    ModeNotFound { connector: u32, name: String },
    #[error("Failed to initialize the buffer allocator")]
    AllocatorInitFailed(#[source] io::Error),
    #[error("Failed to allocate scanout buffer {index}")]
    BufferAllocationFailed {
        index: usize,
        #[source]
        source: io::Error,
    },
    #[error("Failed to map scanout buffer {index}")]
    BufferMapFailed {
        index: usize,
        #[source]
        source: io::Error,
    },
    #[error("Failed to register framebuffer for scanout buffer {index}")]
    FramebufferRegistrationFailed {
        index: usize,
        #[source]
        source: io::Error,
    },
    #[error("Frame of {len} bytes is smaller than the expected {expected} bytes")]
    UndersizedFrame { len: usize, expected: usize },
    #[error("Failed to submit framebuffer for scanout")]
    ScanoutSubmitFailed(#[source] io::Error),
    #[error("Failed to restore the previous crtc configuration")]
    RestoreModeFailed(#[source] io::Error),
    #[error("Failed to disable the overlay plane")]
    ScanoutDisableFailed(#[source] io::Error),
    #[error("Failed to release scanout buffer {index}")]
    BufferReleaseFailed {
        index: usize,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    UnsupportedCaps(#[from] CapsError),
    #[error("Cannot {operation} while the sink is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}
