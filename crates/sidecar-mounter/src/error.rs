// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Diagnostic, Debug, Error)]
#[diagnostic(
    url(
        "https://spkenv.dev/error_codes#{}",
        self.code().unwrap_or_else(|| Box::new("sidecar_mounter::generic"))
    )
)]
pub enum Error {
    #[error("failed to connect to the socket {0:?}: {1}")]
    Connect(PathBuf, #[source] io::Error),
    #[error("failed to receive mount options from the socket {0:?}: {1}")]
    Receive(PathBuf, #[source] io::Error),
    #[error("timed out after {1:?} waiting for mount options on the socket {0:?}")]
    #[diagnostic(
        code("sidecar_mounter::receive_timeout"),
        help("The driver never wrote to the socket, increase ipc.receive_timeout_secs if it is slow")
    )]
    ReceiveTimeout(PathBuf, Duration),
    #[error("no file descriptor was passed over the socket {0:?}")]
    MissingFileDescriptor(PathBuf),
    #[error("mount options on the socket {0:?} are larger than {1} bytes")]
    #[diagnostic(code("sidecar_mounter::payload_too_large"))]
    PayloadTooLarge(PathBuf, usize),

    #[error("failed to unmarshal the mount config: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to fetch bucket name from CSI driver")]
    MissingBucketName,

    #[error("invalid config file flag: {0:?}")]
    InvalidConfigFileFlag(String),
    #[error("failed to serialize config file {0:?}: {1}")]
    SerializeConfigFile(PathBuf, #[source] serde_yaml::Error),
    #[error("failed to create config file {0:?}: {1}")]
    WriteConfigFile(PathBuf, #[source] io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
