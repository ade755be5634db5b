// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Translation of a driver's mount request into the flags and config
//! file used to start a mount engine inside a sidecar container.

#![deny(unsafe_op_in_unsafe_fn)]

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod fixtures;

pub mod config;
pub mod document;
mod error;
pub mod error_writer;
pub mod flags;
pub mod ipc;
mod mount_config;
pub mod options;
pub mod paths;
mod port;
mod request;

pub use error::{Error, Result};
pub use error_writer::{ErrorWriter, FileErrorWriter};
pub use flags::{ConfigFileFlagMap, FlagMap};
pub use mount_config::{ENGINE_DEVICE_FD, ENGINE_MOUNT_POINT, MountConfig};
pub use port::PortCounter;
pub use request::MountRequest;

pub use self::config::{Settings, load_settings};
