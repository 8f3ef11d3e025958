// SPDX-License-Identifier: GPL-3.0-only

//! The display operations the sink needs from the platform.
//!
//! [`KmsCard`](super::card::KmsCard) maps these onto the legacy DRM/KMS api.
//! Everything above this module only talks to a [`DisplayControl`], which keeps
//! buffer and mode handling independent of a real device.

use smithay::{
    reexports::drm::{
        buffer::Buffer,
        control::{connector, crtc, framebuffer, plane},
    },
    utils::{Physical, Rectangle},
};
use std::{fmt, io, ops::DerefMut, path::Path};

/// Opens display devices.
pub trait DisplayBackend {
    type Device: DisplayControl;

    fn open(&self, path: &Path) -> io::Result<Self::Device>;
}

pub trait DisplayControl {
    /// Backing allocation of a scanout buffer.
    type Buffer: Buffer;
    /// A buffer mapped into process memory.
    type Mapping: DerefMut<Target = [u8]>;
    type Mode: Copy + PartialEq + fmt::Debug;

    /// Prepare the device for scanout buffer allocations.
    fn init_allocator(&mut self) -> io::Result<()>;
    fn release_allocator(&mut self);

    fn crtcs(&self) -> io::Result<Vec<crtc::Handle>>;
    fn planes(&self) -> io::Result<Vec<plane::Handle>>;
    fn plane_state(&self, plane: plane::Handle) -> io::Result<PlaneState>;
    fn connectors(&self) -> io::Result<Vec<connector::Handle>>;
    fn connector_info(
        &self,
        connector: connector::Handle,
    ) -> io::Result<ConnectorDescriptor<Self::Mode>>;
    fn crtc_state(&self, crtc: crtc::Handle) -> io::Result<CrtcState<Self::Mode>>;

    /// Allocate an `XRGB8888` buffer usable for scanout.
    fn create_scanout_buffer(&mut self, size: (u32, u32)) -> io::Result<Self::Buffer>;
    fn map_buffer(&mut self, buffer: &Self::Buffer) -> io::Result<Self::Mapping>;
    fn unmap_buffer(&mut self, mapping: Self::Mapping) -> io::Result<()>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer) -> io::Result<()>;
    fn add_framebuffer(&mut self, buffer: &Self::Buffer) -> io::Result<framebuffer::Handle>;
    fn remove_framebuffer(&mut self, framebuffer: framebuffer::Handle) -> io::Result<()>;

    /// Attach `framebuffer` to `plane` or detach the plane with `None`.
    ///
    /// `src` is in 16.16 fixed point.
    fn set_plane(
        &mut self,
        plane: plane::Handle,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        dst: Rectangle<i32, Physical>,
        src: (u32, u32, u32, u32),
    ) -> io::Result<()>;
    fn set_crtc(
        &mut self,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        position: (u32, u32),
        connectors: &[connector::Handle],
        mode: Option<Self::Mode>,
    ) -> io::Result<()>;
    /// Swap the framebuffer of an already configured crtc, returning once the
    /// new framebuffer is scanned out.
    fn flip_crtc(
        &mut self,
        crtc: crtc::Handle,
        framebuffer: framebuffer::Handle,
    ) -> io::Result<()>;
    fn dirty_framebuffer(&mut self, framebuffer: framebuffer::Handle) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneState {
    pub handle: plane::Handle,
    pub crtc: Option<crtc::Handle>,
    pub framebuffer: Option<framebuffer::Handle>,
    pub possible_crtcs: Vec<crtc::Handle>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrtcState<M> {
    pub handle: crtc::Handle,
    pub mode: Option<M>,
    pub framebuffer: Option<framebuffer::Handle>,
    pub position: (u32, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeDescriptor<M> {
    pub name: String,
    pub size: (u16, u16),
    /// Refresh rate in millihertz
    pub refresh: u32,
    pub preferred: bool,
    pub mode: M,
}

impl<M> ModeDescriptor<M> {
    pub fn size(&self) -> (u32, u32) {
        (self.size.0 as u32, self.size.1 as u32)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorDescriptor<M> {
    pub handle: connector::Handle,
    pub name: String,
    pub connected: bool,
    pub modes: Vec<ModeDescriptor<M>>,
}
