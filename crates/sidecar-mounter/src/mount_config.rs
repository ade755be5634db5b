// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use crate::config::Settings;
use crate::document::{add_token_server, build_document, write_document};
use crate::error_writer::{ErrorWriter, FileErrorWriter};
use crate::flags::{ConfigFileFlagMap, FlagMap};
use crate::ipc::{ReceivedMessage, receive_from_socket};
use crate::options::OptionTranslator;
use crate::paths::VolumePaths;
use crate::port::PortCounter;
use crate::request::MountRequest;
use crate::Result;

#[cfg(test)]
#[path = "./mount_config_test.rs"]
mod mount_config_test;

/// The descriptor number that the engine inherits the device on.
pub const ENGINE_DEVICE_FD: RawFd = 3;

/// Where the engine finds the descriptor it inherits as its first extra file.
pub const ENGINE_MOUNT_POINT: &str = "/dev/fd/3";

/// Everything needed to start the mount engine for one volume.
#[derive(Debug)]
pub struct MountConfig {
    pub request: MountRequest,
    pub paths: VolumePaths,
    pub flags: FlagMap,
    pub config_file_flags: ConfigFileFlagMap,
}

impl MountConfig {
    /// Prepare a mount from the request waiting on the given socket.
    ///
    /// Any failure is also written to the volume's error file, since the
    /// driver cannot be reached once the socket has been read.
    pub fn from_socket<D, K, V>(
        socket_path: &Path,
        settings: &Settings,
        ports: &PortCounter,
        driver_defaults: D,
    ) -> Result<Self>
    where
        D: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let paths = VolumePaths::from_socket_path(socket_path, &settings.volumes);
        let error_writer = FileErrorWriter::new(paths.error_file());
        let timeout = settings.ipc.receive_timeout();
        Self::prepare(
            paths,
            || receive_from_socket(socket_path, timeout),
            ports,
            driver_defaults,
            &error_writer,
        )
    }

    /// Run the pipeline on a message obtained from `receive`.
    pub fn prepare<R, D, K, V>(
        paths: VolumePaths,
        receive: R,
        ports: &PortCounter,
        driver_defaults: D,
        error_writer: &dyn ErrorWriter,
    ) -> Result<Self>
    where
        R: FnOnce() -> Result<ReceivedMessage>,
        D: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let result = Self::try_prepare(paths, receive, ports, driver_defaults);
        if let Err(err) = &result {
            error_writer.write_msg(&err.to_string());
        }
        result
    }

    fn try_prepare<R, D, K, V>(
        paths: VolumePaths,
        receive: R,
        ports: &PortCounter,
        driver_defaults: D,
    ) -> Result<Self>
    where
        R: FnOnce() -> Result<ReceivedMessage>,
        D: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let ReceivedMessage {
            file_descriptor,
            payload,
        } = receive()?;
        let mut request =
            MountRequest::decode(&payload, paths.volume_name.clone(), file_descriptor)?;

        let translation = OptionTranslator::new(&paths, ports).translate(&mut request);
        let mut config_file_flags = translation.config_file_flags;
        config_file_flags.merge_defaults(driver_defaults);

        let mut document = build_document(config_file_flags.iter())?;
        if !request.token_server_identity_provider.is_empty() && request.host_network_ksa_opt_in
        {
            add_token_server(&mut document, &paths.token_url());
        }
        write_document(&document, &paths.config_file)?;

        tracing::info!(
            volume = %request.volume_name,
            bucket = %request.bucket_name,
            flags = %translation.flags,
            "prepared mount config"
        );
        Ok(Self {
            request,
            paths,
            flags: translation.flags,
            config_file_flags,
        })
    }

    pub fn config_file(&self) -> &Path {
        &self.paths.config_file
    }

    pub fn file_descriptor(&self) -> &OwnedFd {
        &self.request.file_descriptor
    }

    /// The full argument list for the mount engine.
    pub fn engine_args(&self) -> Vec<String> {
        let mut args = self.flags.to_args();
        args.push(self.request.bucket_name.clone());
        args.push(ENGINE_MOUNT_POINT.to_string());
        args
    }

    /// Set up `cmd` to start the mount engine for this volume.
    ///
    /// The engine arguments are appended and the received descriptor is
    /// passed to the child as [`ENGINE_DEVICE_FD`]. The command only
    /// refers to the descriptor, so it must be spawned while this config
    /// is still alive.
    pub fn configure_engine_command(&self, cmd: &mut Command) {
        cmd.args(self.engine_args());
        let fd = self.file_descriptor().as_raw_fd();
        // SAFETY: the hook only makes async-signal-safe calls
        unsafe {
            cmd.pre_exec(move || match inherit_as_engine_device(fd) {
                Ok(()) => Ok(()),
                Err(err) => Err(std::io::Error::from_raw_os_error(err as i32)),
            });
        }
    }
}

fn inherit_as_engine_device(fd: RawFd) -> nix::Result<()> {
    if fd == ENGINE_DEVICE_FD {
        // already in place, but dup2 onto itself would leave close-on-exec set
        nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFD(nix::fcntl::FdFlag::empty()))?;
    } else {
        nix::unistd::dup2(fd, ENGINE_DEVICE_FD)?;
    }
    Ok(())
}
