// SPDX-License-Identifier: GPL-3.0-only

use smithay::reexports::drm::control::{connector, Mode, ModeFlags, ModeTypeFlags};

use super::control::ModeDescriptor;

pub fn interface_name(conn_info: &connector::Info) -> String {
    let other_short_name;
    let interface_short_name = match conn_info.interface() {
        connector::Interface::DVII => "DVI-I",
        connector::Interface::DVID => "DVI-D",
        connector::Interface::DVIA => "DVI-A",
        connector::Interface::SVideo => "S-VIDEO",
        connector::Interface::DisplayPort => "DP",
        connector::Interface::HDMIA => "HDMI-A",
        connector::Interface::HDMIB => "HDMI-B",
        connector::Interface::EmbeddedDisplayPort => "eDP",
        other => {
            other_short_name = format!("{:?}", other);
            &other_short_name
        }
    };

    format!("{}-{}", interface_short_name, conn_info.interface_id())
}

// Returns refresh rate in milliherz
pub fn calculate_refresh_rate(mode: Mode) -> u32 {
    let htotal = mode.hsync().2 as u32;
    let vtotal = mode.vsync().2 as u32;
    if htotal == 0 || vtotal == 0 {
        return 0;
    }
    let mut refresh =
        (mode.clock() as u64 * 1000000_u64 / htotal as u64 + vtotal as u64 / 2) / vtotal as u64;

    if mode.flags().contains(ModeFlags::INTERLACE) {
        refresh *= 2;
    }
    if mode.flags().contains(ModeFlags::DBLSCAN) {
        refresh /= 2;
    }
    if mode.vscan() > 1 {
        refresh /= mode.vscan() as u64;
    }

    refresh as u32
}

pub fn mode_descriptor(mode: Mode) -> ModeDescriptor<Mode> {
    ModeDescriptor {
        name: mode.name().to_string_lossy().into_owned(),
        size: mode.size(),
        refresh: calculate_refresh_rate(mode),
        preferred: mode.mode_type().contains(ModeTypeFlags::PREFERRED),
        mode,
    }
}

/// Format a refresh rate given in millihertz.
pub fn format_refresh(refresh: u32) -> String {
    format!("{}.{:03}Hz", refresh / 1000, refresh % 1000)
}
