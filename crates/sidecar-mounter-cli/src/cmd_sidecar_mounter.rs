// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

#![deny(unsafe_op_in_unsafe_fn)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use sidecar_mounter::{MountConfig, PortCounter, Settings};

mod args;

#[cfg(test)]
#[path = "./cmd_sidecar_mounter_test.rs"]
mod cmd_sidecar_mounter_test;

fn main() {
    // because this function exits right away it does not
    // properly handle destruction of data, so we put the actual
    // logic into a separate function/scope
    std::process::exit(main2())
}
fn main2() -> i32 {
    let mut opt = CmdSidecarMounter::parse();
    opt.logging.configure();

    let settings = match sidecar_mounter::load_settings() {
        Err(err) => {
            tracing::error!(err = ?err, "failed to load settings");
            return 1;
        }
        Ok(settings) => settings,
    };

    match opt.run(settings) {
        Err(err) => {
            tracing::error!("{err:?}");
            1
        }
        Ok(code) => code,
    }
}

/// Prepare mount engine invocations from the driver's mount requests.
///
/// Each socket is connected to in turn and the request found there is
/// translated into engine flags and a config file. One json object
/// describing the engine invocation is printed per prepared mount.
///
/// With --engine, the engine is also started for every prepared mount
/// with the driver's descriptor as fd 3, and this command waits for all
/// of them to exit.
#[derive(Debug, Parser)]
#[clap(name = "sidecar-mounter", version = sidecar_mounter::VERSION)]
pub struct CmdSidecarMounter {
    #[clap(flatten)]
    pub logging: args::Logging,

    /// Seconds to wait for the driver to send a request, 0 waits forever
    ///
    /// Defaults to the ipc.receive_timeout_secs setting.
    #[clap(long)]
    receive_timeout: Option<u64>,

    /// Config file entry to use unless a mount option sets it, as path=value
    ///
    /// Paths are colon-delimited, eg: logging:severity=info. Can be given
    /// more than once.
    #[clap(long = "config-file-flag", value_parser = parse_config_file_flag)]
    config_file_flags: Vec<(String, String)>,

    /// The mount engine to start for each prepared mount
    #[clap(long)]
    engine: Option<PathBuf>,

    /// The sockets to read mount requests from, in order
    #[clap(required = true)]
    sockets: Vec<PathBuf>,
}

/// One prepared mount, as printed to stdout.
#[derive(Debug, Serialize)]
struct Invocation<'a> {
    volume: &'a str,
    bucket: &'a str,
    config_file: &'a Path,
    args: Vec<String>,
}

impl CmdSidecarMounter {
    pub fn run(&mut self, mut settings: Settings) -> Result<i32> {
        if let Some(secs) = self.receive_timeout {
            settings.ipc.receive_timeout_secs = secs;
        }
        let ports = PortCounter::new(settings.mount.metrics_port_base);

        let mut failures = 0;
        let mut engines = Vec::new();
        for socket in self.sockets.iter() {
            let config = match MountConfig::from_socket(
                socket,
                &settings,
                &ports,
                self.config_file_flags.iter().cloned(),
            ) {
                Ok(config) => config,
                Err(err) => {
                    // already reported to the driver through the error file
                    tracing::debug!(socket = %socket.display(), "skipping failed mount: {err}");
                    failures += 1;
                    continue;
                }
            };

            let invocation = Invocation {
                volume: &config.request.volume_name,
                bucket: &config.request.bucket_name,
                config_file: config.config_file(),
                args: config.engine_args(),
            };
            let line = serde_json::to_string(&invocation)
                .context("Failed to serialize engine invocation")?;
            println!("{line}");

            let Some(engine) = &self.engine else {
                continue;
            };
            match spawn_engine(engine, &config) {
                Ok(child) => engines.push((config.request.volume_name.clone(), child)),
                Err(err) => {
                    tracing::error!(volume = %config.request.volume_name, "{err:?}");
                    failures += 1;
                }
            }
        }

        for (volume, mut child) in engines {
            match child.wait() {
                Ok(status) if status.success() => {
                    tracing::info!(%volume, "mount engine exited");
                }
                Ok(status) => {
                    tracing::error!(%volume, %status, "mount engine failed");
                    failures += 1;
                }
                Err(err) => {
                    tracing::error!(%volume, ?err, "failed to wait for mount engine");
                    failures += 1;
                }
            }
        }

        Ok(if failures == 0 { 0 } else { 1 })
    }
}

/// Start the engine for one mount, the descriptor is closed in this
/// process when `config` is dropped.
fn spawn_engine(engine: &Path, config: &MountConfig) -> Result<Child> {
    let mut cmd = Command::new(engine);
    config.configure_engine_command(&mut cmd);
    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to start mount engine {engine:?}"))?;
    tracing::info!(
        volume = %config.request.volume_name,
        pid = child.id(),
        "started mount engine"
    );
    Ok(child)
}

fn parse_config_file_flag(arg: &str) -> Result<(String, String)> {
    match arg.split_once('=') {
        Some((path, value)) if !path.is_empty() => Ok((path.to_string(), value.to_string())),
        _ => anyhow::bail!("expected path=value, got {arg:?}"),
    }
}
