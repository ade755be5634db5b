// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Expansion of config file flags into the engine's yaml config file.

use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./document_test.rs"]
mod document_test;

/// The config file is only ever read by the engine, as the same user.
pub const CONFIG_FILE_MODE: u32 = 0o400;
const PATH_SEPARATOR: char = ':';
const GCS_AUTH_SECTION: &str = "gcs-auth";
const TOKEN_URL_KEY: &str = "token-url";

/// Give a raw config value its type.
///
/// Integers win over booleans so that `1` and `0` stay numbers.
pub fn parse_leaf(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(b) = parse_bool(raw) {
        return Value::Bool(b);
    }
    Value::String(raw.to_string())
}

/// Accepts the same spellings as the engine's own flag parser.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Build the nested config document from colon-delimited paths.
///
/// Every path segment but the last names a mapping, the last holds a
/// typed value. A path that would need to be both a value and a mapping
/// is an error, whichever of the two is seen first.
pub fn build_document<I, K, V>(entries: I) -> Result<Mapping>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut root = Mapping::new();
    for (path, raw) in entries {
        let path = path.as_ref();
        let invalid = || Error::InvalidConfigFileFlag(path.to_string());

        let mut segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        let leaf = segments.pop().unwrap_or_default();

        let mut level = &mut root;
        for segment in segments {
            let next = level
                .entry(Value::String(segment.to_string()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            level = next.as_mapping_mut().ok_or_else(invalid)?;
        }

        let key = Value::String(leaf.to_string());
        if level.get(&key).is_some_and(Value::is_mapping) {
            return Err(invalid());
        }
        level.insert(key, parse_leaf(raw.as_ref()));
    }
    Ok(root)
}

/// Point the engine's token requests at the sidecar's token server.
///
/// Replaces any existing `gcs-auth` section.
pub fn add_token_server(document: &mut Mapping, token_url: &str) {
    let mut auth = Mapping::new();
    auth.insert(
        Value::String(TOKEN_URL_KEY.to_string()),
        Value::String(token_url.to_string()),
    );
    document.insert(
        Value::String(GCS_AUTH_SECTION.to_string()),
        Value::Mapping(auth),
    );
}

/// Serialize the document and write it, readable only by its owner.
pub fn write_document(document: &Mapping, path: &Path) -> Result<()> {
    let yaml = serde_yaml::to_string(document)
        .map_err(|err| Error::SerializeConfigFile(path.to_owned(), err))?;
    tracing::debug!(path = %path.display(), "config file content:\n{yaml}");

    let write_err = |err: std::io::Error| Error::WriteConfigFile(path.to_owned(), err);
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(CONFIG_FILE_MODE)
        .open(path)
        .map_err(write_err)?;
    // the mode above only applies to newly created files
    file.set_permissions(std::fs::Permissions::from_mode(CONFIG_FILE_MODE))
        .map_err(write_err)?;
    file.write_all(yaml.as_bytes()).map_err(write_err)?;
    Ok(())
}
