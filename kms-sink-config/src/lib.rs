// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

pub mod caps;

pub const DEFAULT_DEVICE: &str = "/dev/dri/card0";
pub const DEFAULT_MODE: &str = "preferred";
/// Upper bound for object ids and plane positions.
pub const MAX_PROPERTY_VALUE: u32 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error("{field} is {value}, which is outside of 0..={max}", max = MAX_PROPERTY_VALUE)]
    OutOfRange { field: &'static str, value: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SinkConfig {
    #[serde(default = "default_device")]
    pub device: PathBuf,
    pub output: OutputConfig,
}

/// Where frames end up on screen.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputConfig {
    /// Overlay plane on top of whatever the crtc currently shows.
    Plane {
        plane: u32,
        crtc: u32,
        #[serde(default)]
        x: u32,
        #[serde(default)]
        y: u32,
    },
    /// Exclusive use of the crtc, driving `connector` with `mode`.
    Crtc {
        connector: u32,
        crtc: u32,
        #[serde(default = "default_mode")]
        mode: String,
    },
}

fn default_device() -> PathBuf {
    PathBuf::from(DEFAULT_DEVICE)
}

fn default_mode() -> String {
    String::from(DEFAULT_MODE)
}

impl Default for SinkConfig {
    fn default() -> SinkConfig {
        SinkConfig {
            device: default_device(),
            output: OutputConfig::Plane {
                plane: 0,
                crtc: 0,
                x: 0,
                y: 0,
            },
        }
    }
}

impl OutputConfig {
    pub fn crtc(&self) -> u32 {
        match self {
            OutputConfig::Plane { crtc, .. } | OutputConfig::Crtc { crtc, .. } => *crtc,
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |field: &'static str, value: u32| {
            if value > MAX_PROPERTY_VALUE {
                Err(ConfigError::OutOfRange { field, value })
            } else {
                Ok(())
            }
        };

        match &self.output {
            OutputConfig::Plane { plane, crtc, x, y } => {
                check("plane", *plane)?;
                check("crtc", *crtc)?;
                check("x", *x)?;
                check("y", *y)
            }
            OutputConfig::Crtc {
                connector, crtc, ..
            } => {
                check("connector", *connector)?;
                check("crtc", *crtc)
            }
        }
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<SinkConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = ron::from_str::<SinkConfig>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    debug!(path = %path.display(), ?config, "Loaded sink config");
    Ok(config)
}
