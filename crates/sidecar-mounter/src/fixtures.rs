// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::cell::RefCell;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rstest::fixture;
use tempfile::TempDir;

use crate::config::{Settings, Volumes};
use crate::error_writer::ErrorWriter;

#[allow(dead_code)]
pub fn init_logging() {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter("sidecar_mounter=trace")
        .without_time()
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(sub);
}

/// Run `f` with its logs collected, returning its output and the
/// formatted log lines.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter("sidecar_mounter=trace")
        .without_time()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let output = tracing::subscriber::with_default(sub, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (output, logs)
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[fixture]
pub fn tmpdir() -> TempDir {
    tempfile::Builder::new()
        .prefix("sidecar-mounter-test-")
        .tempdir()
        .expect("failed to create dir for test")
}

/// Settings whose volume roots all live inside the given directory.
pub fn settings_in(root: &Path) -> Settings {
    Settings {
        volumes: Volumes {
            tmp_root: root.join("tmp"),
            buffer_root: root.join("buffer"),
            cache_root: root.join("cache"),
        },
        ..Default::default()
    }
}

/// Remembers every message instead of writing it anywhere.
#[derive(Default)]
pub struct RecordingErrorWriter {
    pub messages: RefCell<Vec<String>>,
}

impl ErrorWriter for RecordingErrorWriter {
    fn write_msg(&self, msg: &str) {
        self.messages.borrow_mut().push(msg.to_string());
    }
}
