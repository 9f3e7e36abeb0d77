// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Test doubles shared between this crate's unit tests and its `tests/`
//! integration tests, mirroring `bosminer`'s `test_utils` module (always
//! compiled, not `cfg(test)`-gated, so an external integration test binary
//! can use it too).

use std::os::unix::net::UnixStream;
use std::sync::Mutex;

use crate::session::Transport;
use crate::work::{HostWorkProvider, Work};

/// A connected pair of Unix-domain sockets stands in for the serial link:
/// one end goes into a [`crate::session::Session`], the other is driven
/// directly by the test as the simulated device.
impl Transport for UnixStream {}

/// Build a `Session`-ready transport pair. Returns `(board_side, device_side)`.
pub fn transport_pair() -> (Box<dyn Transport>, UnixStream) {
    let (a, b) = UnixStream::pair().expect("socketpair");
    (Box::new(a), b)
}

/// A [`HostWorkProvider`] that always has exactly one work ready and records
/// everything the driver does with it, for scenario-style integration tests.
#[derive(Default)]
pub struct RecordingHost {
    pub submitted: Mutex<Vec<(u32, bool)>>,
    pub discarded: Mutex<usize>,
    pub freed: Mutex<usize>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted_nonces(&self) -> Vec<u32> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| *n)
            .collect()
    }
}

impl HostWorkProvider for RecordingHost {
    fn get_work(&self) -> Work {
        Work::new([0u8; 80], 1)
    }

    fn submit_nonce(&self, _work: &Work, nonce: u32) -> bool {
        self.submitted.lock().unwrap().push((nonce, true));
        true
    }

    fn discard_work(&self, _work: Work) {
        *self.discarded.lock().unwrap() += 1;
    }

    fn free_work(&self, _work: Work) {
        *self.freed.lock().unwrap() += 1;
    }
}
