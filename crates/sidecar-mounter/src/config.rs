// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

const ENV_PREFIX: &str = "SIDECAR_MOUNTER_";
const SYSTEM_CONFIG: &str = "/etc/sidecar-mounter";

/// Locations where the pod webhook mounts the sidecar's shared volumes.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Volumes {
    /// Emptydir shared with the driver, holds sockets and config files
    pub tmp_root: PathBuf,
    /// Scratch space handed to the engine as its temp dir
    pub buffer_root: PathBuf,
    /// Backing storage for the engine's file cache
    pub cache_root: PathBuf,
}

impl Default for Volumes {
    fn default() -> Self {
        Self {
            tmp_root: PathBuf::from("/gcsfuse-tmp"),
            buffer_root: PathBuf::from("/gcsfuse-buffer"),
            cache_root: PathBuf::from("/gcsfuse-cache"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Mount {
    /// The first metrics port handed out to a mount engine
    ///
    /// Each subsequent mount in the same process receives the next port.
    pub metrics_port_base: u16,
}

impl Default for Mount {
    fn default() -> Self {
        Self {
            metrics_port_base: 62990,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Ipc {
    /// Maximum number of seconds to wait for the driver's message
    ///
    /// Zero waits forever.
    pub receive_timeout_secs: u64,
}

impl Default for Ipc {
    fn default() -> Self {
        Self {
            receive_timeout_secs: 60,
        }
    }
}

impl Ipc {
    pub fn receive_timeout(&self) -> Option<Duration> {
        match self.receive_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Configuration values for the sidecar mounter.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    // These sub-types should only have one level of values within
    // them so that they remain addressable with environment variables.
    pub volumes: Volumes,
    pub mount: Mount,
    pub ipc: Ipc,
}

impl Settings {
    /// Parse settings from a toml string, filling in defaults.
    pub fn load_string<S: AsRef<str>>(conf: S) -> Result<Self> {
        use config::{Config as RawConfig, File, FileFormat};

        let config = RawConfig::builder()
            .add_source(File::from_str(conf.as_ref(), FileFormat::Toml))
            .build()?;
        Ok(Settings::deserialize(config)?)
    }
}

/// Load the sidecar settings from the system config and environment.
///
/// The system config can be in any format supported by the config crate
/// (toml, yaml, json, ...) and may be absent. Variables of the form
/// `SIDECAR_MOUNTER_<SECTION>_<NAME>` override individual values.
pub fn load_settings() -> Result<Settings> {
    use config::{Config as RawConfig, File};

    let mut config_builder =
        RawConfig::builder().add_source(File::with_name(SYSTEM_CONFIG).required(false));

    for (var, value) in std::env::vars() {
        let Some(tail) = var.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let Some((section, name)) = tail.split_once('_') else {
            // values without a section, eg: SIDECAR_MOUNTER_LOG
            continue;
        };

        let key = format!("{}.{}", section.to_lowercase(), name.to_lowercase());
        config_builder = config_builder.set_override(key, value)?;
    }

    let config = config_builder.build()?;
    Ok(Settings::deserialize(config)?)
}
