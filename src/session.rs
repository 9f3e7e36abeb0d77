// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Serial transport: opening, reopening and purging the UART link to a
//! board, grounded in `zeus_open`/`zeus_reopen`/`flush_uart` in the
//! original driver.
//!
//! The I/O loop and Work Controller only ever see a [`Transport`], not a
//! concrete `serialport` type — the same "swap a concrete I/O type behind a
//! narrow trait" shape `bosminer-am1-s9` uses for its FPGA FIFO, so an
//! integration test can drive a `Session` over a socketpair instead of real
//! hardware.

use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::thread::sleep;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};

use crate::config::READ_FAULT_DECISECONDS;
use crate::error::{Error, ErrorKind, Result};
use crate::logging::macros::*;

/// How long `Session::reopen` sleeps between closing the old handle and
/// attempting to open a new one (mirrors `cgsleep_ms(500)` in `zeus_reopen`).
const REOPEN_BACKOFF: Duration = Duration::from_millis(500);

/// Post-open settle time for `open_for_run`, giving the board time to
/// finish its own power-on reset before the I/O loop starts talking to it.
const RUN_SETTLE: Duration = Duration::from_secs(1);

/// Narrow surface a board's I/O loop needs from its link to the device.
pub trait Transport: Read + Write + AsRawFd + Send {
    /// Discard whatever is sitting unread in the kernel's input buffer
    /// (`flush_uart`/`tcflush(fd, TCIFLUSH)`). A no-op by default: only a
    /// real serial port has a notion of line-discipline input buffering
    /// worth purging.
    fn purge_input(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Transport for Box<dyn SerialPort> {
    fn purge_input(&mut self) -> Result<()> {
        self.clear(ClearBuffer::Input)
            .map_err(|e| Error::from(ErrorKind::Io(e.to_string())))
    }
}

fn open_raw(path: &str, baud: u32) -> Result<Box<dyn Transport>> {
    let mut port = serialport::new(path, baud)
        .timeout(Duration::from_millis(READ_FAULT_DECISECONDS as u64 * 100))
        .open()?;
    port.clear(ClearBuffer::Input)
        .map_err(|e| Error::from(ErrorKind::Io(e.to_string())))?;
    Ok(Box::new(port))
}

/// Owns the (possibly absent) open handle to a board's link and knows how
/// to (re)establish it.
pub struct Session {
    path: String,
    baud: u32,
    transport: Option<Box<dyn Transport>>,
}

impl Session {
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
            transport: None,
        }
    }

    /// Wrap an already-open transport (real or fake) directly, bypassing
    /// `serialport` entirely. Used by tests and by detection, which hands
    /// its already-open probe connection straight to the board.
    pub fn from_transport(path: impl Into<String>, baud: u32, transport: Box<dyn Transport>) -> Self {
        Self {
            path: path.into(),
            baud,
            transport: Some(transport),
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn transport_mut(&mut self) -> Option<&mut dyn Transport> {
        self.transport.as_deref_mut()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.transport.as_ref().map(|p| p.as_raw_fd())
    }

    /// One-shot open used during detection: no read timeout beyond the
    /// fixed fault interval, purged on success, no post-open settle.
    /// Returns the opened transport directly rather than storing it, since
    /// detection never keeps a `Session` around past its own scope.
    pub fn open_for_detect(path: &str, baud: u32) -> Result<Box<dyn Transport>> {
        open_raw(path, baud)
    }

    /// Open used once a board has been handed to the I/O loop: same as
    /// `open_for_detect`, plus a one-second settle before the port is
    /// handed back, giving the board time to finish its own reset.
    fn open_for_run(path: &str, baud: u32) -> Result<Box<dyn Transport>> {
        let transport = open_raw(path, baud)?;
        sleep(RUN_SETTLE);
        Ok(transport)
    }

    /// OS-level purge of pending input on the currently-open transport, if
    /// any.
    pub fn flush_input(&mut self) -> Result<()> {
        match &mut self.transport {
            Some(transport) => transport.purge_input(),
            None => Ok(()),
        }
    }

    /// Close any currently-open handle, wait out the reopen backoff, and
    /// attempt exactly one open. Returns whether the session is open
    /// afterwards (never returns `Err`, matching `zeus_reopen`'s bool
    /// result: failure is reported by returning `false`, not by aborting
    /// the caller's loop).
    pub fn reopen(&mut self) -> bool {
        if self.transport.is_some() {
            debug!("Closing {} (fd={:?})", self.path, self.raw_fd());
            self.transport = None;
            sleep(REOPEN_BACKOFF);
        }

        debug!("Attempting to open {}", self.path);
        match Self::open_for_run(&self.path, self.baud) {
            Ok(transport) => {
                debug!(
                    "Successfully opened {} (fd={})",
                    self.path,
                    transport.as_raw_fd()
                );
                self.transport = Some(transport);
                true
            }
            Err(e) => {
                error!("Failed to open {}: {}", self.path, e);
                false
            }
        }
    }

    /// Mark the session closed without attempting to reopen, e.g. after an
    /// I/O error observed mid-transaction.
    pub fn close(&mut self) {
        self.transport = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_session_is_closed() {
        let s = Session::new("/dev/null-not-a-real-port", 115_200);
        assert!(!s.is_open());
        assert_eq!(s.raw_fd(), None);
    }

    #[test]
    fn close_on_already_closed_session_is_a_noop() {
        let mut s = Session::new("/dev/null-not-a-real-port", 115_200);
        s.close();
        assert!(!s.is_open());
    }

    #[test]
    fn reopen_fails_gracefully_against_a_non_serial_path() {
        // a plain regular file exists at this path but `serialport` will
        // refuse to open it as a TTY, exercising the same failure path as a
        // device that was unplugged: `reopen` must return `false` rather
        // than panicking or leaving a half-open transport behind.
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut s = Session::new(file.path().to_str().unwrap(), 115_200);
        assert!(!s.reopen());
        assert!(!s.is_open());
    }
}
