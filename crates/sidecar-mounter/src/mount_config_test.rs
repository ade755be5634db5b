// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::HashMap;
use std::io::{IoSlice, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use nix::sys::socket::{ControlMessage, MsgFlags, sendmsg};
use rstest::rstest;
use serde_yaml::Mapping;

use super::MountConfig;
use crate::fixtures::*;
use crate::ipc::ReceivedMessage;
use crate::paths::VolumePaths;
use crate::{Error, PortCounter, Result};

const NO_DEFAULTS: [(&str, &str); 0] = [];

/// Lay out the volume directories that the driver and webhook would create.
fn volume_paths(root: &Path, volume: &str) -> (PathBuf, VolumePaths) {
    let settings = settings_in(root);
    let socket = settings
        .volumes
        .tmp_root
        .join(".volumes")
        .join(volume)
        .join("socket");
    std::fs::create_dir_all(socket.parent().unwrap()).unwrap();
    let paths = VolumePaths::from_socket_path(&socket, &settings.volumes);
    (socket, paths)
}

fn message(payload: &str) -> Box<dyn FnOnce() -> Result<ReceivedMessage>> {
    let payload = payload.as_bytes().to_vec();
    Box::new(move || {
        Ok(ReceivedMessage {
            file_descriptor: std::fs::File::open("/dev/null").unwrap().into(),
            payload,
        })
    })
}

fn read_config(path: &Path) -> Mapping {
    serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[rstest]
fn test_prepare_mount_config(tmpdir: tempfile::TempDir) {
    init_logging();
    let (_, paths) = volume_paths(tmpdir.path(), "vol-1");
    let ports = PortCounter::new(62990);
    let errors = RecordingErrorWriter::default();

    let config = MountConfig::prepare(
        paths.clone(),
        message(
            r#"{"bucketName":"my-bucket","options":["implicit-dirs","uid=1000","file-cache:max-size-mb:100","app-name=myapp","temp-dir=/evil"]}"#,
        ),
        &ports,
        NO_DEFAULTS,
        &errors,
    )
    .expect("mount config should be prepared");

    assert!(errors.messages.borrow().is_empty());
    assert_eq!(config.request.bucket_name, "my-bucket");
    assert_eq!(config.request.volume_name, "vol-1");
    assert_eq!(config.flags.get("uid"), Some(&"1000".to_string()));
    assert_eq!(config.flags.get("prometheus-port"), Some(&"62990".to_string()));
    assert_eq!(
        config.flags.get("temp-dir"),
        Some(&paths.engine_temp_dir()),
        "denied options never replace the sidecar's values"
    );

    let expected_cache_dir = paths.cache_dir.display().to_string();
    let written = read_config(config.config_file());
    let expected: Mapping = serde_yaml::from_str(&format!(
        "logging: {{file-path: /dev/fd/1, format: json}}\n\
         cache-dir: {expected_cache_dir}\n\
         file-cache: {{max-size-mb: 100}}\n"
    ))
    .unwrap();
    assert_eq!(written, expected);

    let args = config.engine_args();
    assert_eq!(args.first().map(String::as_str), Some("--app-name=gke-gcs-fuse-csi-myapp"));
    assert!(args.contains(&"--implicit-dirs".to_string()));
    assert!(args.contains(&"--foreground".to_string()));
    assert!(args.contains(&format!("--config-file={}", paths.config_file.display())));
    assert_eq!(
        &args[args.len() - 2..],
        &["my-bucket".to_string(), "/dev/fd/3".to_string()]
    );
}

#[rstest]
fn test_prepare_driver_defaults_do_not_override(tmpdir: tempfile::TempDir) {
    let (_, paths) = volume_paths(tmpdir.path(), "vol-1");
    let ports = PortCounter::default();
    let defaults = HashMap::from([
        ("logging:format", "text"),
        ("logging:severity", "warning"),
        ("metadata-cache:ttl-secs", "3600"),
    ]);

    let config = MountConfig::prepare(
        paths,
        message(r#"{"bucketName":"b","options":["metadata-cache:ttl-secs:60"]}"#),
        &ports,
        defaults,
        &RecordingErrorWriter::default(),
    )
    .unwrap();

    let flags = &config.config_file_flags;
    assert_eq!(flags.get("logging:format"), Some(&"json".to_string()));
    assert_eq!(flags.get("logging:severity"), Some(&"warning".to_string()));
    assert_eq!(flags.get("metadata-cache:ttl-secs"), Some(&"60".to_string()));
    let written = read_config(config.config_file());
    assert_eq!(
        written["metadata-cache"]["ttl-secs"],
        serde_yaml::Value::Number(60.into())
    );
}

#[rstest]
fn test_prepare_sequential_ports(tmpdir: tempfile::TempDir) {
    let ports = PortCounter::new(62990);
    let port_of = |config: &MountConfig| config.flags.get("prometheus-port").unwrap().clone();
    let run = |volume: &str, options: &str| {
        let (_, paths) = volume_paths(tmpdir.path(), volume);
        MountConfig::prepare(
            paths,
            message(&format!(r#"{{"bucketName":"b","options":{options}}}"#)),
            &ports,
            NO_DEFAULTS,
            &RecordingErrorWriter::default(),
        )
        .unwrap()
    };

    let first = run("vol-1", "[]");
    let second = run("vol-2", r#"["disable-metrics-for-gke:true"]"#);
    let third = run("vol-3", "[]");
    assert_eq!(port_of(&first), "62990");
    assert_eq!(port_of(&second), "0", "metrics were disabled for this mount");
    assert_eq!(port_of(&third), "62992", "the disabled mount still used a port");
}

#[rstest]
#[case::opted_in(r#"["token-server-identity-provider=idp","hnw-ksa=true"]"#, true)]
#[case::no_opt_in(r#"["token-server-identity-provider=idp"]"#, false)]
#[case::no_provider(r#"["hnw-ksa=true"]"#, false)]
fn test_prepare_token_server(
    tmpdir: tempfile::TempDir,
    #[case] options: &str,
    #[case] expect_auth: bool,
) {
    let (_, paths) = volume_paths(tmpdir.path(), "vol-1");
    let config = MountConfig::prepare(
        paths.clone(),
        message(&format!(r#"{{"bucketName":"b","options":{options}}}"#)),
        &PortCounter::default(),
        NO_DEFAULTS,
        &RecordingErrorWriter::default(),
    )
    .unwrap();

    let written = read_config(config.config_file());
    match written.get("gcs-auth") {
        Some(auth) if expect_auth => {
            assert_eq!(
                auth["token-url"],
                serde_yaml::Value::String(paths.token_url())
            );
        }
        None if !expect_auth => {}
        other => panic!("unexpected gcs-auth section: {other:?}"),
    }
}

#[rstest]
fn test_prepare_missing_bucket_reported(tmpdir: tempfile::TempDir) {
    let (_, paths) = volume_paths(tmpdir.path(), "vol-1");
    let ports = PortCounter::new(5);
    let errors = RecordingErrorWriter::default();
    let config_file = paths.config_file.clone();

    let err = MountConfig::prepare(
        paths,
        message(r#"{"options":["implicit-dirs"]}"#),
        &ports,
        NO_DEFAULTS,
        &errors,
    )
    .expect_err("a bucket is required");

    assert!(matches!(err, Error::MissingBucketName));
    assert_eq!(
        *errors.messages.borrow(),
        vec!["failed to fetch bucket name from CSI driver".to_string()]
    );
    assert!(!config_file.exists(), "no config file should be written");
    assert_eq!(ports.peek(), Some(5), "no port is used by a failed decode");
}

#[rstest]
fn test_prepare_receive_failure_reported(tmpdir: tempfile::TempDir) {
    let (socket, paths) = volume_paths(tmpdir.path(), "vol-1");
    let errors = RecordingErrorWriter::default();
    let err = MountConfig::prepare(
        paths,
        || Err(Error::MissingFileDescriptor(socket.clone())),
        &PortCounter::default(),
        NO_DEFAULTS,
        &errors,
    )
    .expect_err("should fail");
    assert!(matches!(err, Error::MissingFileDescriptor(_)));
    assert_eq!(errors.messages.borrow().len(), 1, "reported exactly once");
}

#[rstest]
fn test_prepare_collision_reported(tmpdir: tempfile::TempDir) {
    let (_, paths) = volume_paths(tmpdir.path(), "vol-1");
    let errors = RecordingErrorWriter::default();
    let config_file = paths.config_file.clone();
    let err = MountConfig::prepare(
        paths,
        message(r#"{"bucketName":"b","options":["file-cache:x"]}"#),
        &PortCounter::default(),
        [("file-cache:max-size-mb", "10")],
        &errors,
    )
    .expect_err("file-cache cannot be both a value and a section");
    assert!(matches!(err, Error::InvalidConfigFileFlag(_)), "got {err:?}");
    assert_eq!(errors.messages.borrow().len(), 1);
    assert!(!config_file.exists());
}

#[rstest]
fn test_from_socket(tmpdir: tempfile::TempDir) {
    let settings = settings_in(tmpdir.path());
    let (socket, paths) = volume_paths(tmpdir.path(), "vol-1");
    let listener = UnixListener::bind(&socket).unwrap();
    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let device = std::fs::File::open("/dev/null").unwrap();
        let fds = [device.as_raw_fd()];
        let payload = br#"{"bucketName":"b","options":["debug_fuse=true"]}"#;
        sendmsg::<()>(
            stream.as_raw_fd(),
            &[IoSlice::new(payload)],
            &[ControlMessage::ScmRights(&fds)],
            MsgFlags::empty(),
            None,
        )
        .unwrap();
    });

    let ports = PortCounter::new(100);
    let config = MountConfig::from_socket(&socket, &settings, &ports, NO_DEFAULTS)
        .expect("should prepare from socket");
    server.join().unwrap();

    assert_eq!(config.paths, paths);
    assert!(config.flags.contains_key("debug_fuse=true"));
    assert!(config.config_file().exists());
    assert!(config.file_descriptor().as_raw_fd() >= 0);
    assert!(!socket.exists());
    assert!(!paths.error_file().exists());
}

#[rstest]
fn test_from_socket_connect_failure_writes_error_file(tmpdir: tempfile::TempDir) {
    let settings = settings_in(tmpdir.path());
    let (socket, paths) = volume_paths(tmpdir.path(), "vol-1");

    let err = MountConfig::from_socket(&socket, &settings, &PortCounter::default(), NO_DEFAULTS)
        .expect_err("there is nothing listening");
    assert!(matches!(err, Error::Connect(..)), "got {err:?}");

    let reported = std::fs::read_to_string(paths.error_file()).unwrap();
    assert!(
        reported.starts_with("failed to connect to the socket"),
        "got {reported}"
    );
}

#[rstest]
fn test_engine_command_inherits_descriptor(tmpdir: tempfile::TempDir) {
    let (_, paths) = volume_paths(tmpdir.path(), "vol-1");
    let device = tmpdir.path().join("device");
    std::fs::File::create(&device)
        .unwrap()
        .write_all(b"from the driver")
        .unwrap();
    let receive = move || {
        Ok(ReceivedMessage {
            file_descriptor: std::fs::File::open(&device).unwrap().into(),
            payload: br#"{"bucketName":"b"}"#.to_vec(),
        })
    };
    let config = MountConfig::prepare(
        paths,
        receive,
        &PortCounter::default(),
        NO_DEFAULTS,
        &RecordingErrorWriter::default(),
    )
    .unwrap();

    // the engine arguments become positional parameters of the script
    let mut cmd = std::process::Command::new("/bin/sh");
    cmd.args(["-c", r#"cat <&3; echo; echo "$@""#, "engine"]);
    config.configure_engine_command(&mut cmd);
    let output = cmd.output().expect("should run the engine");

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8(output.stdout).unwrap();
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("from the driver"));
    let args = lines.next().unwrap();
    assert!(args.ends_with("b /dev/fd/3"), "got {args}");
    assert!(args.contains("--foreground"), "got {args}");
}
