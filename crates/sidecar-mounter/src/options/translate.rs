// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use super::{
    APP_NAME,
    APP_NAME_FLAG,
    CACHE_DIR,
    FALSE_STR,
    FlagAction,
    METRICS_PORT_FLAG,
    PathAction,
    TRUE_STR,
    classify_flag,
    classify_path,
    is_path_form,
};
use crate::flags::{ConfigFileFlagMap, FlagMap};
use crate::paths::VolumePaths;
use crate::port::PortCounter;
use crate::request::MountRequest;

#[cfg(test)]
#[path = "./translate_test.rs"]
mod translate_test;

/// Where the engine sends its logs, its stdout is collected by the sidecar.
const LOG_FILE_PATH: &str = "/dev/fd/1";
const LOG_FORMAT: &str = "json";

/// The outcome of translating one request's options.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Translation {
    pub flags: FlagMap,
    pub config_file_flags: ConfigFileFlagMap,
    /// Options that were discarded, as they were given
    pub invalid: Vec<String>,
}

/// Turns a request's options into engine flags and config file entries.
pub struct OptionTranslator<'a> {
    paths: &'a VolumePaths,
    ports: &'a PortCounter,
}

impl<'a> OptionTranslator<'a> {
    pub fn new(paths: &'a VolumePaths, ports: &'a PortCounter) -> Self {
        Self { paths, ports }
    }

    /// The flags that every engine is started with.
    pub fn baseline_flags(&self, metrics_port: u16) -> FlagMap {
        let config_file = self.paths.config_file.display().to_string();
        crate::flag_map! {FlagMap;
            APP_NAME_FLAG => APP_NAME,
            "temp-dir" => self.paths.engine_temp_dir(),
            "config-file" => config_file,
            "foreground" => "",
            "uid" => "0",
            "gid" => "0",
            METRICS_PORT_FLAG => metrics_port.to_string(),
        }
    }

    /// The config file entries that every engine is started with.
    pub fn baseline_config_file_flags() -> ConfigFileFlagMap {
        crate::flag_map! {ConfigFileFlagMap;
            "logging:file-path" => LOG_FILE_PATH,
            "logging:format" => LOG_FORMAT,
            // the file cache is disabled unless a size is requested
            CACHE_DIR => "",
        }
    }

    /// Translate the request's options, allocating a new metrics port.
    ///
    /// Metrics are disabled for the mount when no port is left.
    ///
    /// Options that cannot be accepted are discarded and reported with a
    /// single warning, they never stop the mount. The identity provider
    /// and host network opt-in options are stored back into the request.
    pub fn translate(&self, request: &mut MountRequest) -> Translation {
        let metrics_port = self.ports.allocate().unwrap_or_else(|| {
            tracing::warn!(
                volume = %request.volume_name,
                "no metrics port left, disabling metrics for this mount"
            );
            0
        });
        let mut flags = self.baseline_flags(metrics_port);
        let mut config_file_flags = Self::baseline_config_file_flags();
        let mut invalid = Vec::new();

        for option in request.options.iter() {
            tracing::info!(%option, "processing mount option");

            if is_path_form(option) {
                let Some((path, value)) = option.rsplit_once(':') else {
                    continue;
                };
                match classify_path(path, value) {
                    PathAction::DisableMetrics => {
                        if value == TRUE_STR {
                            flags.insert(METRICS_PORT_FLAG.to_string(), "0".to_string());
                        }
                    }
                    PathAction::Reject => invalid.push(option.clone()),
                    PathAction::EnableFileCache => {
                        config_file_flags.insert(path.to_string(), value.to_string());
                        config_file_flags.insert(
                            CACHE_DIR.to_string(),
                            self.paths.cache_dir.display().to_string(),
                        );
                    }
                    PathAction::Store => {
                        config_file_flags.insert(path.to_string(), value.to_string());
                    }
                }
                continue;
            }

            let (flag, value) = option.split_once('=').unwrap_or((option.as_str(), ""));
            match classify_flag(flag, value) {
                FlagAction::Reject => invalid.push(option.clone()),
                FlagAction::CaptureIdentityProvider => {
                    request.token_server_identity_provider = value.to_string();
                }
                FlagAction::CaptureHostNetworkOptIn => {
                    request.host_network_ksa_opt_in = value == TRUE_STR;
                }
                FlagAction::FoldBoolLiteral => {
                    let folded = format!("{flag}={value}");
                    if value == TRUE_STR || value == FALSE_STR {
                        flags.insert(folded, String::new());
                    } else {
                        invalid.push(folded);
                    }
                }
                FlagAction::NamespaceAppName => {
                    flags.insert(flag.to_string(), format!("{APP_NAME}-{value}"));
                }
                FlagAction::Store => {
                    flags.insert(flag.to_string(), value.to_string());
                }
            }
        }

        if !invalid.is_empty() {
            tracing::warn!(
                volume = %request.volume_name,
                ?invalid,
                "got invalid arguments, will discard invalid args and continue to mount"
            );
        }

        Translation {
            flags,
            config_file_flags,
            invalid,
        }
    }
}
