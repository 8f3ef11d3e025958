// SPDX-License-Identifier: GPL-3.0-only

use kms_sink_config::{OutputConfig, DEFAULT_MODE};
use smithay::reexports::drm::control::{connector, crtc, plane};
use tracing::{debug, info, warn};

use std::{fmt, path::Path};

use super::{
    control::{ConnectorDescriptor, DisplayBackend, DisplayControl, ModeDescriptor, PlaneState},
    drm_helpers,
    error::{MissingTarget, SinkError},
};

/// A configured output, resolved against the device.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTarget<M> {
    Plane {
        plane: plane::Handle,
        crtc: crtc::Handle,
        position: (u32, u32),
    },
    Crtc {
        connector: connector::Handle,
        crtc: crtc::Handle,
        mode: ModeDescriptor<M>,
    },
}

pub fn open_device<B: DisplayBackend>(backend: &B, path: &Path) -> Result<B::Device, SinkError> {
    backend
        .open(path)
        .map_err(|source| SinkError::DeviceOpenFailed {
            path: path.to_path_buf(),
            source,
        })
}

pub fn resolve_target<D: DisplayControl>(
    device: &D,
    output: &OutputConfig,
) -> Result<OutputTarget<D::Mode>, SinkError> {
    let crtc = find_crtc(device, output.crtc())?;

    match output {
        OutputConfig::Plane { plane, x, y, .. } => {
            let plane = find_plane(device, *plane)?;
            if !plane.possible_crtcs.contains(&crtc) {
                warn!(
                    plane = u32::from(plane.handle),
                    crtc = u32::from(crtc),
                    "Plane does not list the crtc as possible, the kernel will likely refuse it"
                );
            }
            info!(
                plane = u32::from(plane.handle),
                crtc = u32::from(crtc),
                x,
                y,
                "Using overlay plane"
            );
            Ok(OutputTarget::Plane {
                plane: plane.handle,
                crtc,
                position: (*x, *y),
            })
        }
        OutputConfig::Crtc {
            connector, mode, ..
        } => {
            let conn_info = find_connector(device, *connector)?;
            if !conn_info.connected {
                warn!("Connector {} is not connected", conn_info.name);
            }
            let mode = select_mode(&conn_info.modes, mode)
                .cloned()
                .ok_or_else(|| SinkError::ModeNotFound {
                    connector: *connector,
                    name: mode.clone(),
                })?;
            info!(
                connector = %conn_info.name,
                crtc = u32::from(crtc),
                mode = %mode.name,
                refresh = %drm_helpers::format_refresh(mode.refresh),
                "Using crtc"
            );
            Ok(OutputTarget::Crtc {
                connector: conn_info.handle,
                crtc,
                mode,
            })
        }
    }
}

fn find_crtc<D: DisplayControl>(device: &D, id: u32) -> Result<crtc::Handle, SinkError> {
    device
        .crtcs()
        .map_err(|source| SinkError::EnumerationFailed {
            what: "crtcs",
            source,
        })?
        .into_iter()
        .find(|crtc| u32::from(*crtc) == id)
        .ok_or(SinkError::TargetNotFound(MissingTarget::Crtc(id)))
}

fn find_plane<D: DisplayControl>(device: &D, id: u32) -> Result<PlaneState, SinkError> {
    let planes = device
        .planes()
        .map_err(|source| SinkError::EnumerationFailed {
            what: "planes",
            source,
        })?;

    planes
        .into_iter()
        .filter(|plane| u32::from(*plane) == id)
        .find_map(|plane| match device.plane_state(plane) {
            Ok(state) => Some(state),
            Err(err) => {
                warn!(?err, plane = id, "Failed to query plane");
                None
            }
        })
        .ok_or(SinkError::TargetNotFound(MissingTarget::Plane(id)))
}

fn find_connector<D: DisplayControl>(
    device: &D,
    id: u32,
) -> Result<ConnectorDescriptor<D::Mode>, SinkError> {
    let connectors = device
        .connectors()
        .map_err(|source| SinkError::EnumerationFailed {
            what: "connectors",
            source,
        })?;

    connectors
        .into_iter()
        .filter(|conn| u32::from(*conn) == id)
        .find_map(|conn| match device.connector_info(conn) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(?err, connector = id, "Failed to query connector");
                None
            }
        })
        .ok_or(SinkError::TargetNotFound(MissingTarget::Connector(id)))
}

/// Pick the mode called `name`.
///
/// `"preferred"` falls back to the mode flagged as preferred, or the first one,
/// unless the connector really has a mode with that name.
pub fn select_mode<'a, M>(
    modes: &'a [ModeDescriptor<M>],
    name: &str,
) -> Option<&'a ModeDescriptor<M>> {
    modes.iter().find(|mode| mode.name == name).or_else(|| {
        if name == DEFAULT_MODE {
            modes.iter().find(|mode| mode.preferred).or(modes.first())
        } else {
            None
        }
    })
}

/// Everything a user needs to pick an output target.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputListing {
    pub crtcs: Vec<crtc::Handle>,
    pub planes: Vec<PlaneState>,
    pub connectors: Vec<ConnectorDescriptor<()>>,
}

pub fn list_outputs<D: DisplayControl>(device: &D) -> Result<OutputListing, SinkError> {
    let enumeration = |what| move |source| SinkError::EnumerationFailed { what, source };

    let crtcs = device.crtcs().map_err(enumeration("crtcs"))?;
    let planes = device
        .planes()
        .map_err(enumeration("planes"))?
        .into_iter()
        .filter_map(|plane| device.plane_state(plane).ok())
        .collect();
    let connectors = device
        .connectors()
        .map_err(enumeration("connectors"))?
        .into_iter()
        .filter_map(|conn| device.connector_info(conn).ok())
        .map(|info| ConnectorDescriptor {
            handle: info.handle,
            name: info.name,
            connected: info.connected,
            modes: info
                .modes
                .into_iter()
                .map(|mode| ModeDescriptor {
                    name: mode.name,
                    size: mode.size,
                    refresh: mode.refresh,
                    preferred: mode.preferred,
                    mode: (),
                })
                .collect(),
        })
        .collect();

    debug!("Enumerated outputs");
    Ok(OutputListing {
        crtcs,
        planes,
        connectors,
    })
}

impl fmt::Display for OutputListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |crtcs: &[crtc::Handle]| {
            crtcs
                .iter()
                .map(|crtc| u32::from(*crtc).to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let id_or_none = |id: Option<u32>| id.map_or_else(|| String::from("none"), |id| id.to_string());

        writeln!(f, "CRTCs: {}", ids(&self.crtcs))?;
        writeln!(f, "Planes:")?;
        for plane in &self.planes {
            writeln!(
                f,
                "  {}: crtc {}, framebuffer {}, possible crtcs [{}]",
                u32::from(plane.handle),
                id_or_none(plane.crtc.map(u32::from)),
                id_or_none(plane.framebuffer.map(u32::from)),
                ids(&plane.possible_crtcs),
            )?;
        }
        writeln!(f, "Connectors:")?;
        for conn in &self.connectors {
            writeln!(
                f,
                "  {}: {} ({})",
                u32::from(conn.handle),
                conn.name,
                if conn.connected {
                    "connected"
                } else {
                    "disconnected"
                }
            )?;
            for mode in &conn.modes {
                writeln!(
                    f,
                    "    {} {}x{} @ {}{}",
                    mode.name,
                    mode.size.0,
                    mode.size.1,
                    drm_helpers::format_refresh(mode.refresh),
                    if mode.preferred { " (preferred)" } else { "" }
                )?;
            }
        }
        Ok(())
    }
}
