// SPDX-License-Identifier: GPL-3.0-only

use rustix::{
    fs::{self, Mode as FileMode, OFlags},
    mm::{self, MapFlags, ProtFlags},
};
use smithay::{
    backend::drm::DrmDeviceFd,
    reexports::drm::{
        buffer::{Buffer, DrmFourcc},
        control::{
            connector, crtc, dumbbuffer::DumbBuffer, framebuffer, plane,
            Device as ControlDevice, Event, Mode, PageFlipFlags,
        },
        Device as BasicDevice, DriverCapability,
    },
    utils::{DeviceFd, Physical, Rectangle},
};
use tracing::{debug, warn};

use std::{
    fmt, io,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    os::unix::io::AsFd,
    path::{Path, PathBuf},
    ptr::{self, NonNull},
    slice,
};

use super::{
    control::{
        ConnectorDescriptor, CrtcState, DisplayBackend, DisplayControl, PlaneState,
    },
    drm_helpers,
};

/// Opens real DRM devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct KmsBackend;

impl DisplayBackend for KmsBackend {
    type Device = KmsCard;

    fn open(&self, path: &Path) -> io::Result<KmsCard> {
        KmsCard::open(path)
    }
}

pub struct KmsCard {
    fd: DrmDeviceFd,
    path: PathBuf,
    dumb_buffers: bool,
}

impl fmt::Debug for KmsCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsCard")
            .field("path", &self.path)
            .field("dumb_buffers", &self.dumb_buffers)
            .finish()
    }
}

impl KmsCard {
    pub fn open(path: &Path) -> io::Result<KmsCard> {
        let fd = fs::open(
            path,
            OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY,
            FileMode::empty(),
        )?;
        let fd = DrmDeviceFd::new(DeviceFd::from(fd));

        // Plane and crtc updates need master, but another client may legitimately
        // hold it (e.g. when only overlaying).
        if let Err(err) = fd.acquire_master_lock() {
            warn!(?err, "Failed to become drm master for {}", path.display());
        }
        if let Ok(driver) = fd.get_driver() {
            debug!(
                "Opened {} (driver {})",
                path.display(),
                driver.name().to_string_lossy()
            );
        }

        Ok(KmsCard {
            fd,
            path: path.to_path_buf(),
            dumb_buffers: false,
        })
    }
}

impl DisplayControl for KmsCard {
    type Buffer = DumbBuffer;
    type Mapping = MappedRegion;
    type Mode = Mode;

    fn init_allocator(&mut self) -> io::Result<()> {
        if self.fd.get_driver_capability(DriverCapability::DumbBuffer)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "driver does not support dumb buffers",
            ));
        }
        self.dumb_buffers = true;
        Ok(())
    }

    fn release_allocator(&mut self) {
        self.dumb_buffers = false;
    }

    fn crtcs(&self) -> io::Result<Vec<crtc::Handle>> {
        Ok(self.fd.resource_handles()?.crtcs().to_vec())
    }

    fn planes(&self) -> io::Result<Vec<plane::Handle>> {
        self.fd.plane_handles()
    }

    fn plane_state(&self, plane: plane::Handle) -> io::Result<PlaneState> {
        let info = self.fd.get_plane(plane)?;
        let res_handles = self.fd.resource_handles()?;
        Ok(PlaneState {
            handle: info.handle(),
            crtc: info.crtc(),
            framebuffer: info.framebuffer(),
            possible_crtcs: res_handles.filter_crtcs(info.possible_crtcs()),
        })
    }

    fn connectors(&self) -> io::Result<Vec<connector::Handle>> {
        Ok(self.fd.resource_handles()?.connectors().to_vec())
    }

    fn connector_info(&self, conn: connector::Handle) -> io::Result<ConnectorDescriptor<Mode>> {
        let info = self.fd.get_connector(conn, false)?;
        Ok(ConnectorDescriptor {
            handle: info.handle(),
            name: drm_helpers::interface_name(&info),
            connected: info.state() == connector::State::Connected,
            modes: info
                .modes()
                .iter()
                .copied()
                .map(drm_helpers::mode_descriptor)
                .collect(),
        })
    }

    fn crtc_state(&self, crtc: crtc::Handle) -> io::Result<CrtcState<Mode>> {
        let info = self.fd.get_crtc(crtc)?;
        Ok(CrtcState {
            handle: info.handle(),
            mode: info.mode(),
            framebuffer: info.framebuffer(),
            position: info.position(),
        })
    }

    fn create_scanout_buffer(&mut self, size: (u32, u32)) -> io::Result<DumbBuffer> {
        if !self.dumb_buffers {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "buffer allocator is not initialized",
            ));
        }
        self.fd.create_dumb_buffer(size, DrmFourcc::Xrgb8888, 32)
    }

    fn map_buffer(&mut self, buffer: &DumbBuffer) -> io::Result<MappedRegion> {
        let map = drm_ffi::mode::dumbbuffer::map(self.fd.as_fd(), buffer.handle().into(), 0, 0)?;
        let len = buffer.pitch() as usize * buffer.size().1 as usize;
        // SAFETY: a fresh shared mapping of the offset the kernel handed out for
        // this buffer, only ever accessed through the returned region.
        let ptr = unsafe {
            mm::mmap(
                ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &self.fd,
                map.offset,
            )?
        };
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(MappedRegion { ptr, len })
    }

    fn unmap_buffer(&mut self, mapping: MappedRegion) -> io::Result<()> {
        mapping.unmap()
    }

    fn destroy_buffer(&mut self, buffer: DumbBuffer) -> io::Result<()> {
        self.fd.destroy_dumb_buffer(buffer)
    }

    fn add_framebuffer(&mut self, buffer: &DumbBuffer) -> io::Result<framebuffer::Handle> {
        self.fd.add_framebuffer(buffer, 24, 32)
    }

    fn remove_framebuffer(&mut self, framebuffer: framebuffer::Handle) -> io::Result<()> {
        self.fd.destroy_framebuffer(framebuffer)
    }

    fn set_plane(
        &mut self,
        plane: plane::Handle,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        dst: Rectangle<i32, Physical>,
        src: (u32, u32, u32, u32),
    ) -> io::Result<()> {
        self.fd.set_plane(
            plane,
            crtc,
            framebuffer,
            0,
            (
                dst.loc.x,
                dst.loc.y,
                dst.size.w.max(0) as u32,
                dst.size.h.max(0) as u32,
            ),
            src,
        )
    }

    fn set_crtc(
        &mut self,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        position: (u32, u32),
        connectors: &[connector::Handle],
        mode: Option<Mode>,
    ) -> io::Result<()> {
        self.fd
            .set_crtc(crtc, framebuffer, position, connectors, mode)
    }

    fn flip_crtc(
        &mut self,
        crtc: crtc::Handle,
        framebuffer: framebuffer::Handle,
    ) -> io::Result<()> {
        self.fd
            .page_flip(crtc, framebuffer, PageFlipFlags::EVENT, None)?;
        // the fd is blocking, so this waits for the flip to complete
        loop {
            for event in self.fd.receive_events()? {
                if let Event::PageFlip(flip) = event {
                    if flip.crtc == crtc {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn dirty_framebuffer(&mut self, framebuffer: framebuffer::Handle) -> io::Result<()> {
        self.fd.dirty_framebuffer(framebuffer, &[])
    }
}

/// A scanout buffer mapped into our address space.
pub struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedRegion {
    pub fn unmap(self) -> io::Result<()> {
        let region = ManuallyDrop::new(self);
        // SAFETY: ptr/len describe a mapping created in `map_buffer`, which is
        // not accessible anymore after this call.
        unsafe { mm::munmap(region.ptr.as_ptr().cast(), region.len) }?;
        Ok(())
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl Deref for MappedRegion {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the mapping is valid for `len` bytes for the lifetime of self
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for MappedRegion {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `deref`, and we hold the only reference to the region
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: see `unmap`
        if let Err(err) = unsafe { mm::munmap(self.ptr.as_ptr().cast(), self.len) } {
            warn!(?err, "Failed to unmap scanout buffer");
        }
    }
}
