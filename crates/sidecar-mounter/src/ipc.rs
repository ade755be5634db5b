// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Receiving the mount request from the driver over a unix socket.

use std::io::{IoSliceMut, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{ControlMessageOwned, MsgFlags, recvmsg};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./ipc_test.rs"]
mod ipc_test;

/// Upper bound on the size of the driver's payload, larger payloads are
/// rejected rather than cut short.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// One message sent by the driver.
#[derive(Debug)]
pub struct ReceivedMessage {
    pub file_descriptor: OwnedFd,
    pub payload: Vec<u8>,
}

/// Connect to the driver's socket and read its single message.
///
/// The descriptor arrives with the first part of the payload, the rest
/// of the payload is read until the driver closes its end. The
/// connection is closed and the socket file removed once the message
/// has been read, or as soon as reading it has failed.
pub fn receive_from_socket(
    socket_path: &Path,
    timeout: Option<Duration>,
) -> Result<ReceivedMessage> {
    tracing::info!(socket = %socket_path.display(), "connecting to socket");
    let stream = UnixStream::connect(socket_path)
        .map_err(|err| Error::Connect(socket_path.to_owned(), err))?;
    let received = stream
        .set_read_timeout(timeout)
        .map_err(|err| Error::Receive(socket_path.to_owned(), err))
        .and_then(|()| recv_msg(&stream, socket_path, timeout));

    // everything the driver has to say has been read (or never will be)
    drop(stream);
    remove_socket(socket_path);

    received
}

fn recv_msg(
    stream: &UnixStream,
    socket_path: &Path,
    timeout: Option<Duration>,
) -> Result<ReceivedMessage> {
    let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);

    let (bytes, fds) = loop {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = match recvmsg::<()>(
            stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::empty(),
        ) {
            Ok(msg) => msg,
            Err(Errno::EINTR) => continue,
            Err(Errno::EAGAIN) => {
                return Err(Error::ReceiveTimeout(
                    socket_path.to_owned(),
                    timeout.unwrap_or_default(),
                ));
            }
            Err(errno) => return Err(Error::Receive(socket_path.to_owned(), errno.into())),
        };

        let mut fds = Vec::new();
        let cmsgs = msg
            .cmsgs()
            .map_err(|errno| Error::Receive(socket_path.to_owned(), errno.into()))?;
        for cmsg in cmsgs {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                fds.extend(received);
            }
        }
        break (msg.bytes, fds);
    };

    // SAFETY: the kernel installed these descriptors into this process
    // while handling SCM_RIGHTS, nothing else owns them yet
    let mut owned: Vec<OwnedFd> = fds
        .into_iter()
        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
        .collect();
    if owned.is_empty() {
        return Err(Error::MissingFileDescriptor(socket_path.to_owned()));
    }
    // only the first descriptor is used, the rest are closed here
    let file_descriptor = owned.swap_remove(0);
    drop(owned);

    buf.truncate(bytes);
    read_remaining(stream, &mut buf, socket_path, timeout)?;
    Ok(ReceivedMessage {
        file_descriptor,
        payload: buf,
    })
}

/// Read the rest of the payload until the driver closes the connection.
fn read_remaining(
    mut stream: &UnixStream,
    buf: &mut Vec<u8>,
    socket_path: &Path,
    timeout: Option<Duration>,
) -> Result<()> {
    // one byte past the limit is enough to tell that it was exceeded
    let allowed = (MAX_MESSAGE_SIZE + 1).saturating_sub(buf.len());
    match stream.by_ref().take(allowed as u64).read_to_end(buf) {
        Ok(_) => {}
        Err(err)
            if matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) =>
        {
            return Err(Error::ReceiveTimeout(
                socket_path.to_owned(),
                timeout.unwrap_or_default(),
            ));
        }
        Err(err) => return Err(Error::Receive(socket_path.to_owned(), err)),
    }
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(Error::PayloadTooLarge(
            socket_path.to_owned(),
            MAX_MESSAGE_SIZE,
        ));
    }
    Ok(())
}

fn remove_socket(socket_path: &Path) {
    match nix::unistd::unlink(socket_path) {
        Ok(()) => {}
        // the driver may have already removed the socket after
        // seeing that its message was delivered
        Err(Errno::ENOENT) => {}
        Err(err) => {
            tracing::error!(socket = %socket_path.display(), ?err, "failed to unlink socket");
        }
    }
}
