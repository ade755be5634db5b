// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use tracing_subscriber::prelude::*;

const SIDECAR_MOUNTER_LOG: &str = "SIDECAR_MOUNTER_LOG";

/// Command line flags for configuring logging
#[derive(Debug, Clone, clap::Args)]
pub struct Logging {
    /// Make output more verbose, can be specified more than once
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Logging {
    pub fn configure(&self) {
        configure_logging(self.verbose)
    }
}

/// The log filter for the given verbosity.
///
/// At the default verbosity, an existing `SIDECAR_MOUNTER_LOG` is used
/// as is. `RUST_LOG` is always appended to the result.
pub fn log_filter(verbosity: u8) -> String {
    let mut config = match verbosity {
        0 => std::env::var(SIDECAR_MOUNTER_LOG)
            .unwrap_or_else(|_| "sidecar_mounter=info,warn".to_string()),
        1 => "sidecar_mounter=debug,info".to_string(),
        2 => "sidecar_mounter=trace,info".to_string(),
        3 => "sidecar_mounter=trace,debug".to_string(),
        _ => "trace".to_string(),
    };
    if let Ok(overrides) = std::env::var("RUST_LOG") {
        config.push(',');
        config.push_str(&overrides);
    }
    config
}

pub fn configure_logging(verbosity: u8) {
    let env_filter = tracing_subscriber::filter::EnvFilter::new(log_filter(verbosity));
    // stdout is reserved for the prepared mounts
    let stderr_log = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(verbosity > 2)
        .with_writer(std::io::stderr);

    let sub = tracing_subscriber::registry().with(stderr_log.with_filter(env_filter));
    if let Err(err) = tracing::subscriber::set_global_default(sub) {
        eprintln!("WARNING: failed to configure logging: {err}");
    }
}
