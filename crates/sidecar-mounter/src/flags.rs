// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeMap;
use std::iter::FromIterator;

use serde::Serialize;

#[cfg(test)]
#[path = "./flags_test.rs"]
mod flags_test;

/// Create a flag map of the given type from a simple mapping.
///
/// ```
/// # #[macro_use] extern crate sidecar_mounter;
/// # fn main() {
/// let flags = flag_map!{FlagMap; "implicit-dirs" => "", "uid" => "1000"};
/// assert_eq!(flags.get("uid").map(String::as_str), Some("1000"));
/// # }
/// ```
#[macro_export]
macro_rules! flag_map {
    ($ty:ident; $($k:expr => $v:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut flags = $crate::flags::$ty::default();
        $(flags.insert(String::from($k), String::from($v));)*
        flags
    }};
}

macro_rules! string_map {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Default, Clone, PartialEq, Eq, Serialize)]
        #[serde(transparent)]
        pub struct $name {
            flags: BTreeMap<String, String>,
        }

        impl std::ops::Deref for $name {
            type Target = BTreeMap<String, String>;

            fn deref(&self) -> &Self::Target {
                &self.flags
            }
        }

        impl std::ops::DerefMut for $name {
            fn deref_mut(&mut self) -> &mut Self::Target {
                &mut self.flags
            }
        }

        impl FromIterator<(String, String)> for $name {
            fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
                Self {
                    flags: BTreeMap::from_iter(iter),
                }
            }
        }

        impl IntoIterator for $name {
            type IntoIter = std::collections::btree_map::IntoIter<String, String>;
            type Item = (String, String);

            fn into_iter(self) -> Self::IntoIter {
                self.flags.into_iter()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                std::fmt::Display::fmt(self, f)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                let items: Vec<_> = self.iter().map(|(n, v)| format!("{n}: {v:?}")).collect();
                f.write_fmt(format_args!("{{{}}}", items.join(", ")))
            }
        }
    };
}

string_map! {
    /// Command line flags for the mount engine.
    ///
    /// An empty value marks a flag that is passed without any value.
    FlagMap
}

string_map! {
    /// Config file entries keyed by their colon-delimited path, with
    /// values that have not been given a type yet.
    ConfigFileFlagMap
}

impl FlagMap {
    /// Render these flags as command line arguments, in key order.
    pub fn to_args(&self) -> Vec<String> {
        self.iter()
            .map(|(flag, value)| match value.as_str() {
                "" => format!("--{flag}"),
                value => format!("--{flag}={value}"),
            })
            .collect()
    }
}

impl ConfigFileFlagMap {
    /// Add the given defaults for every path not already present.
    ///
    /// Values already in this map always take precedence.
    pub fn merge_defaults<I, K, V>(&mut self, defaults: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in defaults {
            self.flags.entry(key.into()).or_insert_with(|| value.into());
        }
    }
}
