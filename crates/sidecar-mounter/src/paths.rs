// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Path, PathBuf};

use crate::config::Volumes;

#[cfg(test)]
#[path = "./paths_test.rs"]
mod paths_test;

const VOLUMES_DIR: &str = ".volumes";
const CONFIG_FILE_NAME: &str = "config.yaml";
const ERROR_FILE_NAME: &str = "error";
const TOKEN_FILE_NAME: &str = "token.sock";
const UNIX_SOCKET_BASE_PATH: &str = "unix://";
pub const ENGINE_TEMP_DIR: &str = "/temp-dir";

/// Every per-volume location used while preparing one mount.
///
/// The driver creates the socket at `<tmp_root>/.volumes/<volume>/socket`,
/// so the socket's directory doubles as the invocation's temp dir and its
/// name identifies the volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumePaths {
    pub volume_name: String,
    pub temp_dir: PathBuf,
    pub buffer_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub config_file: PathBuf,
}

impl VolumePaths {
    pub fn from_socket_path(socket_path: &Path, volumes: &Volumes) -> Self {
        let temp_dir = socket_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let volume_name = temp_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            buffer_dir: volumes.buffer_root.join(VOLUMES_DIR).join(&volume_name),
            cache_dir: volumes.cache_root.join(VOLUMES_DIR).join(&volume_name),
            config_file: volumes
                .tmp_root
                .join(VOLUMES_DIR)
                .join(&volume_name)
                .join(CONFIG_FILE_NAME),
            temp_dir,
            volume_name,
        }
    }

    /// The temp dir handed to the engine, inside the buffer volume.
    pub fn engine_temp_dir(&self) -> String {
        format!("{}{ENGINE_TEMP_DIR}", self.buffer_dir.display())
    }

    /// The side file read by the driver when this mount fails.
    pub fn error_file(&self) -> PathBuf {
        self.temp_dir.join(ERROR_FILE_NAME)
    }

    /// The address of the token server socket served next to the mount.
    pub fn token_url(&self) -> String {
        format!(
            "{UNIX_SOCKET_BASE_PATH}{}",
            self.temp_dir.join(TOKEN_FILE_NAME).display()
        )
    }
}
