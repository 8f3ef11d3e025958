// SPDX-License-Identifier: GPL-3.0-only

//! Present raw video frames on a DRM/KMS display, either on an overlay plane
//! or by taking over a whole crtc.

pub mod backend;
pub mod config;
pub mod logger;
pub mod playback;

pub use backend::kms::{KmsBackend, KmsSink, LifecycleState, SinkError, TeardownReport};
