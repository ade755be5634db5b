// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Path, PathBuf};

#[cfg(test)]
#[path = "./error_writer_test.rs"]
mod error_writer_test;

/// Reports why a mount could not be prepared.
///
/// Once the socket is gone the driver has no other way to learn about
/// a failure, so it polls a side file instead.
pub trait ErrorWriter {
    fn write_msg(&self, msg: &str);
}

/// Writes failure messages to a file that the driver reads.
#[derive(Clone, Debug)]
pub struct FileErrorWriter {
    path: PathBuf,
}

impl FileErrorWriter {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ErrorWriter for FileErrorWriter {
    fn write_msg(&self, msg: &str) {
        tracing::error!("{msg}");
        if let Err(err) = std::fs::write(&self.path, msg) {
            tracing::error!(
                path = %self.path.display(),
                ?err,
                "failed to write the error file"
            );
        }
    }
}
