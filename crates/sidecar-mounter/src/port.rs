// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(test)]
#[path = "./port_test.rs"]
mod port_test;

/// Hands out a distinct metrics port to every mount engine started by
/// this process.
///
/// The counter is shared by reference between pipeline runs and is
/// never reset, so two engines never end up listening on the same port.
/// Once the last valid port has been handed out the counter is exhausted.
#[derive(Debug)]
pub struct PortCounter {
    // wider than a port so that exhaustion can be represented
    next: AtomicU32,
}

impl PortCounter {
    pub fn new(start: u16) -> Self {
        Self {
            next: AtomicU32::new(start.into()),
        }
    }

    /// Take the current port and advance the counter.
    ///
    /// Returns `None` once every port above the starting one is taken.
    pub fn allocate(&self) -> Option<u16> {
        let last = u32::from(u16::MAX);
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                (next <= last).then_some(next + 1)
            })
            .ok()
            .and_then(|port| u16::try_from(port).ok())
    }

    /// The port that the next call to [`Self::allocate`] will return.
    pub fn peek(&self) -> Option<u16> {
        u16::try_from(self.next.load(Ordering::Relaxed)).ok()
    }
}

impl Default for PortCounter {
    fn default() -> Self {
        Self::new(crate::config::Mount::default().metrics_port_base)
    }
}
