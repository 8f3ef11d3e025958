// SPDX-License-Identifier: GPL-3.0-only

//! An in-memory display device, so the sink can be driven without a kernel.
//!
//! Every call is recorded, and individual operations can be made to fail
//! through [`Faults`].

use smithay::{
    reexports::drm::{
        buffer::{self, Buffer, DrmFourcc},
        control::{self, connector, crtc, framebuffer, plane},
    },
    utils::{Physical, Rectangle},
};

use std::{
    cell::RefCell,
    collections::HashMap,
    io,
    ops::{Deref, DerefMut},
    path::Path,
    rc::Rc,
};

use super::control::{
    ConnectorDescriptor, CrtcState, DisplayBackend, DisplayControl, ModeDescriptor, PlaneState,
};

pub const PLANE: u32 = 31;
pub const OTHER_PLANE: u32 = 32;
/// Lit up with [`PREVIOUS_MODE`] scanning out [`PREVIOUS_FB`].
pub const CRTC: u32 = 40;
pub const IDLE_CRTC: u32 = 41;
pub const CONNECTOR: u32 = 50;
pub const PREVIOUS_FB: u32 = 90;

pub const PREVIOUS_MODE: FakeMode = FakeMode {
    name: "800x600",
    size: (800, 600),
};
const CONNECTOR_MODES: [(FakeMode, bool); 3] = [
    (
        FakeMode {
            name: "1280x720",
            size: (1280, 720),
        },
        true,
    ),
    (
        FakeMode {
            name: "640x480",
            size: (640, 480),
        },
        false,
    ),
    (
        FakeMode {
            name: "320x240",
            size: (320, 240),
        },
        false,
    ),
];

const PITCH_ALIGNMENT: u32 = 64;
/// Fresh mappings are filled with this, so untouched bytes stand out.
pub const POISON: u8 = 0xEE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeMode {
    pub name: &'static str,
    pub size: (u16, u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Close,
    InitAllocator,
    ReleaseAllocator,
    CreateBuffer { buffer: u32, size: (u32, u32) },
    MapBuffer(u32),
    UnmapBuffer(u32),
    DestroyBuffer(u32),
    AddFramebuffer { buffer: u32, framebuffer: u32 },
    RemoveFramebuffer(u32),
    SetPlane {
        plane: u32,
        crtc: u32,
        framebuffer: Option<u32>,
        dst: (i32, i32, i32, i32),
        src: (u32, u32, u32, u32),
    },
    SetCrtc {
        crtc: u32,
        framebuffer: Option<u32>,
        connectors: Vec<u32>,
        mode: Option<FakeMode>,
    },
    Flip { crtc: u32, framebuffer: u32 },
    Dirty(u32),
}

/// Operations to fail. `*_at` fields count calls from zero.
#[derive(Debug, Default)]
pub struct Faults {
    pub open: bool,
    pub enumerate: bool,
    pub crtc_state: bool,
    pub allocator: bool,
    pub alloc_at: Option<usize>,
    pub map_at: Option<usize>,
    pub addfb_at: Option<usize>,
    /// Fails plane updates, modesets and flips that show one of our buffers.
    pub submit: bool,
    /// Fails modesets that don't show one of our buffers.
    pub restore: bool,
    pub disable: bool,
    pub dirty: bool,
    pub pitch_override: Option<u32>,
    pub short_mapping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrtcSlot {
    pub mode: Option<FakeMode>,
    pub framebuffer: Option<u32>,
    pub position: (u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneSlot {
    pub crtc: Option<u32>,
    pub framebuffer: Option<u32>,
}

#[derive(Debug)]
struct BufferSlot {
    mapped: bool,
}

#[derive(Debug)]
struct KernelState {
    calls: Vec<Call>,
    faults: Faults,
    crtcs: HashMap<u32, CrtcSlot>,
    planes: HashMap<u32, PlaneSlot>,
    buffers: HashMap<u32, BufferSlot>,
    /// Framebuffer id to the buffer it was created from, `None` for foreign ones.
    framebuffers: HashMap<u32, Option<u32>>,
    allocator_ready: bool,
    open_devices: usize,
    next_id: u32,
    allocs: usize,
    maps: usize,
    addfbs: usize,
}

impl KernelState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn is_ours(&self, framebuffer: Option<u32>) -> bool {
        framebuffer
            .and_then(|fb| self.framebuffers.get(&fb).copied().flatten())
            .is_some()
    }

    fn check_framebuffer(&self, framebuffer: Option<u32>) -> io::Result<()> {
        match framebuffer {
            Some(fb) if !self.framebuffers.contains_key(&fb) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no framebuffer {}", fb),
            )),
            _ => Ok(()),
        }
    }
}

fn failure(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected {} failure", what))
}

fn id<T: Into<u32>>(handle: T) -> u32 {
    handle.into()
}

fn handle<T: From<control::RawResourceHandle>>(id: u32) -> T {
    control::from_u32(id).expect("ids are never zero")
}

/// The shared state behind every [`FakeDevice`] opened from it.
#[derive(Debug, Clone)]
pub struct FakeKernel(Rc<RefCell<KernelState>>);

impl Default for FakeKernel {
    fn default() -> Self {
        FakeKernel::new()
    }
}

impl FakeKernel {
    pub fn new() -> FakeKernel {
        let crtcs = HashMap::from([
            (
                CRTC,
                CrtcSlot {
                    mode: Some(PREVIOUS_MODE),
                    framebuffer: Some(PREVIOUS_FB),
                    position: (0, 0),
                },
            ),
            (
                IDLE_CRTC,
                CrtcSlot {
                    mode: None,
                    framebuffer: None,
                    position: (0, 0),
                },
            ),
        ]);
        let planes = HashMap::from([
            (PLANE, PlaneSlot::default()),
            (OTHER_PLANE, PlaneSlot::default()),
        ]);

        FakeKernel(Rc::new(RefCell::new(KernelState {
            calls: Vec::new(),
            faults: Faults::default(),
            crtcs,
            planes,
            buffers: HashMap::new(),
            framebuffers: HashMap::from([(PREVIOUS_FB, None)]),
            allocator_ready: false,
            open_devices: 0,
            next_id: 100,
            allocs: 0,
            maps: 0,
            addfbs: 0,
        })))
    }

    pub fn faults(&self, configure: impl FnOnce(&mut Faults)) {
        configure(&mut self.0.borrow_mut().faults)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.borrow_mut().calls.clear()
    }

    pub fn crtc(&self, crtc: u32) -> CrtcSlot {
        self.0.borrow().crtcs[&crtc]
    }

    pub fn plane(&self, plane: u32) -> PlaneSlot {
        self.0.borrow().planes[&plane]
    }

    /// Buffers that were allocated and not destroyed yet.
    pub fn live_buffers(&self) -> usize {
        self.0.borrow().buffers.len()
    }

    pub fn mapped_buffers(&self) -> usize {
        self.0.borrow().buffers.values().filter(|b| b.mapped).count()
    }

    /// Framebuffers created by an open device that are still registered.
    pub fn live_framebuffers(&self) -> usize {
        self.0
            .borrow()
            .framebuffers
            .values()
            .filter(|buffer| buffer.is_some())
            .count()
    }

    pub fn open_devices(&self) -> usize {
        self.0.borrow().open_devices
    }

    pub fn allocator_ready(&self) -> bool {
        self.0.borrow().allocator_ready
    }
}

impl DisplayBackend for FakeKernel {
    type Device = FakeDevice;

    fn open(&self, path: &Path) -> io::Result<FakeDevice> {
        let mut state = self.0.borrow_mut();
        if state.faults.open {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }
        state.calls.push(Call::Open);
        state.open_devices += 1;
        Ok(FakeDevice(self.0.clone()))
    }
}

#[derive(Debug)]
pub struct FakeDevice(Rc<RefCell<KernelState>>);

impl Drop for FakeDevice {
    fn drop(&mut self) {
        let mut state = self.0.borrow_mut();
        state.calls.push(Call::Close);
        state.open_devices -= 1;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct FakeBuffer {
    handle: buffer::Handle,
    size: (u32, u32),
    pitch: u32,
}

impl Buffer for FakeBuffer {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn format(&self) -> DrmFourcc {
        DrmFourcc::Xrgb8888
    }

    fn pitch(&self) -> u32 {
        self.pitch
    }

    fn handle(&self) -> buffer::Handle {
        self.handle
    }
}

#[derive(Debug)]
pub struct FakeMapping {
    buffer: u32,
    bytes: Vec<u8>,
}

impl Deref for FakeMapping {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for FakeMapping {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl DisplayControl for FakeDevice {
    type Buffer = FakeBuffer;
    type Mapping = FakeMapping;
    type Mode = FakeMode;

    fn init_allocator(&mut self) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        if state.faults.allocator {
            return Err(failure("allocator"));
        }
        state.calls.push(Call::InitAllocator);
        state.allocator_ready = true;
        Ok(())
    }

    fn release_allocator(&mut self) {
        let mut state = self.0.borrow_mut();
        state.calls.push(Call::ReleaseAllocator);
        state.allocator_ready = false;
    }

    fn crtcs(&self) -> io::Result<Vec<crtc::Handle>> {
        let state = self.0.borrow();
        if state.faults.enumerate {
            return Err(failure("enumeration"));
        }
        let mut ids = state.crtcs.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        Ok(ids.into_iter().map(handle).collect())
    }

    fn planes(&self) -> io::Result<Vec<plane::Handle>> {
        let state = self.0.borrow();
        if state.faults.enumerate {
            return Err(failure("enumeration"));
        }
        let mut ids = state.planes.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        Ok(ids.into_iter().map(handle).collect())
    }

    fn plane_state(&self, plane: plane::Handle) -> io::Result<PlaneState> {
        let state = self.0.borrow();
        let slot = state
            .planes
            .get(&id(plane))
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        Ok(PlaneState {
            handle: plane,
            crtc: slot.crtc.map(handle),
            framebuffer: slot.framebuffer.map(handle),
            possible_crtcs: vec![handle(CRTC), handle(IDLE_CRTC)],
        })
    }

    fn connectors(&self) -> io::Result<Vec<connector::Handle>> {
        if self.0.borrow().faults.enumerate {
            return Err(failure("enumeration"));
        }
        Ok(vec![handle(CONNECTOR)])
    }

    fn connector_info(
        &self,
        conn: connector::Handle,
    ) -> io::Result<ConnectorDescriptor<FakeMode>> {
        if id(conn) != CONNECTOR {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        }
        Ok(ConnectorDescriptor {
            handle: conn,
            name: String::from("HDMI-A-1"),
            connected: true,
            modes: CONNECTOR_MODES
                .iter()
                .map(|(mode, preferred)| ModeDescriptor {
                    name: mode.name.to_string(),
                    size: mode.size,
                    refresh: 60_000,
                    preferred: *preferred,
                    mode: *mode,
                })
                .collect(),
        })
    }

    fn crtc_state(&self, crtc: crtc::Handle) -> io::Result<CrtcState<FakeMode>> {
        let state = self.0.borrow();
        if state.faults.crtc_state {
            return Err(failure("crtc query"));
        }
        let slot = state
            .crtcs
            .get(&id(crtc))
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        Ok(CrtcState {
            handle: crtc,
            mode: slot.mode,
            framebuffer: slot.framebuffer.map(handle),
            position: slot.position,
        })
    }

    fn create_scanout_buffer(&mut self, size: (u32, u32)) -> io::Result<FakeBuffer> {
        let mut state = self.0.borrow_mut();
        if !state.allocator_ready {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "allocator is not initialized",
            ));
        }
        let index = state.allocs;
        state.allocs += 1;
        if state.faults.alloc_at == Some(index) {
            return Err(failure("allocation"));
        }

        let buffer = state.next_id();
        let pitch = state
            .faults
            .pitch_override
            .unwrap_or_else(|| (size.0 * 4).next_multiple_of(PITCH_ALIGNMENT));
        state.buffers.insert(buffer, BufferSlot { mapped: false });
        state.calls.push(Call::CreateBuffer { buffer, size });
        Ok(FakeBuffer {
            handle: handle(buffer),
            size,
            pitch,
        })
    }

    fn map_buffer(&mut self, buffer: &FakeBuffer) -> io::Result<FakeMapping> {
        let mut state = self.0.borrow_mut();
        let index = state.maps;
        state.maps += 1;
        if state.faults.map_at == Some(index) {
            return Err(failure("map"));
        }

        let id = id(buffer.handle);
        let slot = state
            .buffers
            .get_mut(&id)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        slot.mapped = true;
        let mut len = buffer.pitch as usize * buffer.size.1 as usize;
        if state.faults.short_mapping {
            len -= 1;
        }
        state.calls.push(Call::MapBuffer(id));
        Ok(FakeMapping {
            buffer: id,
            bytes: vec![POISON; len],
        })
    }

    fn unmap_buffer(&mut self, mapping: FakeMapping) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        if let Some(slot) = state.buffers.get_mut(&mapping.buffer) {
            slot.mapped = false;
        }
        state.calls.push(Call::UnmapBuffer(mapping.buffer));
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: FakeBuffer) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        let id = id(buffer.handle);
        state
            .buffers
            .remove(&id)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        state.calls.push(Call::DestroyBuffer(id));
        Ok(())
    }

    fn add_framebuffer(&mut self, buffer: &FakeBuffer) -> io::Result<framebuffer::Handle> {
        let mut state = self.0.borrow_mut();
        let index = state.addfbs;
        state.addfbs += 1;
        if state.faults.addfb_at == Some(index) {
            return Err(failure("framebuffer registration"));
        }

        let buffer = id(buffer.handle);
        let framebuffer = state.next_id();
        state.framebuffers.insert(framebuffer, Some(buffer));
        state.calls.push(Call::AddFramebuffer {
            buffer,
            framebuffer,
        });
        Ok(handle(framebuffer))
    }

    fn remove_framebuffer(&mut self, framebuffer: framebuffer::Handle) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        let fb = id(framebuffer);
        state
            .framebuffers
            .remove(&fb)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;

        // like the kernel, removing a framebuffer in use turns its users off
        for plane in state.planes.values_mut() {
            if plane.framebuffer == Some(fb) {
                *plane = PlaneSlot::default();
            }
        }
        for crtc in state.crtcs.values_mut() {
            if crtc.framebuffer == Some(fb) {
                crtc.framebuffer = None;
                crtc.mode = None;
            }
        }
        state.calls.push(Call::RemoveFramebuffer(fb));
        Ok(())
    }

    fn set_plane(
        &mut self,
        plane: plane::Handle,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        dst: Rectangle<i32, Physical>,
        src: (u32, u32, u32, u32),
    ) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        let framebuffer = framebuffer.map(id);
        if framebuffer.is_some() && state.faults.submit {
            return Err(failure("plane update"));
        }
        if framebuffer.is_none() && state.faults.disable {
            return Err(failure("plane disable"));
        }
        state.check_framebuffer(framebuffer)?;

        let slot = state
            .planes
            .get_mut(&id(plane))
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        *slot = PlaneSlot {
            crtc: framebuffer.map(|_| id(crtc)),
            framebuffer,
        };
        state.calls.push(Call::SetPlane {
            plane: id(plane),
            crtc: id(crtc),
            framebuffer,
            dst: (dst.loc.x, dst.loc.y, dst.size.w, dst.size.h),
            src,
        });
        Ok(())
    }

    fn set_crtc(
        &mut self,
        crtc: crtc::Handle,
        framebuffer: Option<framebuffer::Handle>,
        position: (u32, u32),
        connectors: &[connector::Handle],
        mode: Option<FakeMode>,
    ) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        let framebuffer = framebuffer.map(id);
        if state.is_ours(framebuffer) {
            if state.faults.submit {
                return Err(failure("modeset"));
            }
        } else if state.faults.restore {
            return Err(failure("restore"));
        }
        state.check_framebuffer(framebuffer)?;
        if framebuffer.is_some() != mode.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "a mode needs a framebuffer",
            ));
        }

        let slot = state
            .crtcs
            .get_mut(&id(crtc))
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        *slot = CrtcSlot {
            mode,
            framebuffer,
            position,
        };
        state.calls.push(Call::SetCrtc {
            crtc: id(crtc),
            framebuffer,
            connectors: connectors.iter().copied().map(id).collect(),
            mode,
        });
        Ok(())
    }

    fn flip_crtc(
        &mut self,
        crtc: crtc::Handle,
        framebuffer: framebuffer::Handle,
    ) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        if state.faults.submit {
            return Err(failure("page flip"));
        }
        let fb = id(framebuffer);
        state.check_framebuffer(Some(fb))?;
        let slot = state
            .crtcs
            .get_mut(&id(crtc))
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        if slot.mode.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot flip an inactive crtc",
            ));
        }
        slot.framebuffer = Some(fb);
        state.calls.push(Call::Flip {
            crtc: id(crtc),
            framebuffer: fb,
        });
        Ok(())
    }

    fn dirty_framebuffer(&mut self, framebuffer: framebuffer::Handle) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        state.calls.push(Call::Dirty(id(framebuffer)));
        if state.faults.dirty {
            return Err(io::Error::from(io::ErrorKind::Unsupported));
        }
        Ok(())
    }
}
