// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Translation of the driver's free-form mount options.
//!
//! Each option is either path-form (`namespace:...:leaf:value`), which
//! lands in the engine's config file, or flat (`flag` / `flag=value`),
//! which becomes a command line flag. Both forms are run through an
//! ordered rule table where the first matching rule decides what happens
//! to the option.

mod translate;

pub use translate::{OptionTranslator, Translation};


/// The application name reported by every engine started by the sidecar.
pub const APP_NAME: &str = "gke-gcs-fuse-csi";
pub const TRUE_STR: &str = "true";
pub const FALSE_STR: &str = "false";

pub const IDENTITY_PROVIDER_FLAG: &str = "token-server-identity-provider";
pub const HOST_NETWORK_KSA_OPT_IN_FLAG: &str = "hnw-ksa";
pub const APP_NAME_FLAG: &str = "app-name";
pub const METRICS_PORT_FLAG: &str = "prometheus-port";
pub const DISABLE_METRICS: &str = "disable-metrics-for-gke";
pub const FILE_CACHE_MAX_SIZE: &str = "file-cache:max-size-mb";
pub const CACHE_DIR: &str = "cache-dir";

/// Flags and paths that the sidecar controls itself.
pub const DENIED_FLAGS: &[&str] = &[
    "temp-dir",
    "config-file",
    "foreground",
    "log-file",
    "log-format",
    "key-file",
    "token-url",
    "reuse-token-from-url",
    "o",
    "logging:log-rotate:max-file-size-mb",
    "logging:log-rotate:backup-file-count",
    "logging:log-rotate:compress",
    "cache-dir",
    "experimental-local-file-cache",
    "prometheus-port",
];

/// Flags that only take an explicit boolean literal as their value.
pub const BOOL_FLAGS: &[&str] = &[
    "implicit-dirs",
    "enable-nonexistent-type-cache",
    "debug_fuse_errors",
    "debug_fuse",
    "debug_fs",
    "debug_gcs",
    "debug_http",
    "debug_invariants",
    "debug_mutex",
    "disable-autoconfig",
];

pub fn is_denied(flag: &str) -> bool {
    DENIED_FLAGS.contains(&flag)
}

pub fn is_bool_flag(flag: &str) -> bool {
    BOOL_FLAGS.contains(&flag)
}

/// Path-form options contain a colon, unless the colon is part of a url.
pub fn is_path_form(option: &str) -> bool {
    option.contains(':') && !option.contains("https")
}

/// What to do with a `path:value` option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathAction {
    /// Consumed; when the value is truthy the metrics port is set to 0
    DisableMetrics,
    Reject,
    /// Stored, and the file cache is pointed at the volume's cache dir
    EnableFileCache,
    Store,
}

/// What to do with a `flag[=value]` option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagAction {
    Reject,
    CaptureIdentityProvider,
    CaptureHostNetworkOptIn,
    /// `flag=value` becomes a valueless flag, if the value is a bool literal
    FoldBoolLiteral,
    NamespaceAppName,
    Store,
}

pub struct PathRule {
    pub name: &'static str,
    pub applies: fn(path: &str, value: &str) -> bool,
    pub action: PathAction,
}

pub struct FlagRule {
    pub name: &'static str,
    pub applies: fn(flag: &str, value: &str) -> bool,
    pub action: FlagAction,
}

/// Rules for path-form options, in order of precedence.
pub const PATH_RULES: &[PathRule] = &[
    PathRule {
        name: "metrics toggle",
        applies: |path, _| path == DISABLE_METRICS,
        action: PathAction::DisableMetrics,
    },
    PathRule {
        name: "denied",
        applies: |path, _| is_denied(path),
        action: PathAction::Reject,
    },
    PathRule {
        name: "file cache size",
        applies: |path, value| path == FILE_CACHE_MAX_SIZE && value != "0",
        action: PathAction::EnableFileCache,
    },
    PathRule {
        name: "store",
        applies: |_, _| true,
        action: PathAction::Store,
    },
];

/// Rules for flat options, in order of precedence.
pub const FLAG_RULES: &[FlagRule] = &[
    FlagRule {
        name: "denied",
        applies: |flag, _| is_denied(flag),
        action: FlagAction::Reject,
    },
    FlagRule {
        name: "identity provider",
        applies: |flag, _| flag == IDENTITY_PROVIDER_FLAG,
        action: FlagAction::CaptureIdentityProvider,
    },
    FlagRule {
        name: "host network opt-in",
        applies: |flag, _| flag == HOST_NETWORK_KSA_OPT_IN_FLAG,
        action: FlagAction::CaptureHostNetworkOptIn,
    },
    FlagRule {
        name: "bool literal",
        applies: |flag, value| is_bool_flag(flag) && !value.is_empty(),
        action: FlagAction::FoldBoolLiteral,
    },
    FlagRule {
        name: "app name",
        applies: |flag, _| flag == APP_NAME_FLAG,
        action: FlagAction::NamespaceAppName,
    },
    FlagRule {
        name: "store",
        applies: |_, _| true,
        action: FlagAction::Store,
    },
];

pub fn classify_path(path: &str, value: &str) -> PathAction {
    PATH_RULES
        .iter()
        .find(|rule| (rule.applies)(path, value))
        .map(|rule| rule.action)
        .unwrap_or(PathAction::Store)
}

pub fn classify_flag(flag: &str, value: &str) -> FlagAction {
    FLAG_RULES
        .iter()
        .find(|rule| (rule.applies)(flag, value))
        .map(|rule| rule.action)
        .unwrap_or(FlagAction::Store)
}
