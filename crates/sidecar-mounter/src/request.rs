// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::os::fd::OwnedFd;

use serde::Deserialize;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./request_test.rs"]
mod request_test;

/// The body of the message sent by the driver.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Payload {
    volume_name: String,
    bucket_name: String,
    options: Vec<String>,
}

/// Everything the driver asked for when requesting this mount.
#[derive(Debug)]
pub struct MountRequest {
    pub volume_name: String,
    pub bucket_name: String,
    pub options: Vec<String>,
    /// The opened fuse device, passed through to the engine untouched
    pub file_descriptor: OwnedFd,
    /// Filled in from the options by the translator
    pub token_server_identity_provider: String,
    /// Filled in from the options by the translator
    pub host_network_ksa_opt_in: bool,
}

impl MountRequest {
    /// Decode the driver's payload.
    ///
    /// `volume_name` is the name derived from the socket location, a
    /// non-empty name in the payload takes precedence over it.
    pub fn decode(
        payload: &[u8],
        volume_name: impl Into<String>,
        file_descriptor: OwnedFd,
    ) -> Result<Self> {
        let payload: Payload = serde_json::from_slice(payload).map_err(Error::Decode)?;
        if payload.bucket_name.is_empty() {
            return Err(Error::MissingBucketName);
        }
        let volume_name = if payload.volume_name.is_empty() {
            volume_name.into()
        } else {
            payload.volume_name
        };
        Ok(Self {
            volume_name,
            bucket_name: payload.bucket_name,
            options: payload.options,
            file_descriptor,
            token_server_identity_provider: String::new(),
            host_network_ksa_opt_in: false,
        })
    }
}
