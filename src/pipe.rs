// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! A self-pipe used to wake the I/O thread out of `poll()` when the host
//! calls `flush_work` or `shutdown`, mirroring `info->pipefd`/
//! `notify_io_thread`/`flush_fd` in the original driver.

use nix::unistd::{close, pipe, read, write};
use std::os::unix::io::RawFd;

use crate::error::Result;

/// One tickle byte, matching the original driver's `'W'`.
const TICKLE: u8 = b'W';

pub struct WakePipe {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl WakePipe {
    pub fn new() -> Result<Self> {
        let (read_fd, write_fd) = pipe()?;
        Ok(Self { read_fd, write_fd })
    }

    /// Raw fd to hand to `poll()` alongside the serial port's fd.
    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Wake up anyone blocked in `poll()` on [`read_fd`](Self::read_fd).
    pub fn wake(&self) -> Result<()> {
        write(self.write_fd, &[TICKLE])?;
        Ok(())
    }

    /// Drain whatever is sitting in the read end after a wake-up, so the
    /// next `poll()` doesn't spuriously fire again. A single read, matching
    /// `flush_fd` in the original driver: the read end is left in blocking
    /// mode, so looping until `EWOULDBLOCK` is not an option here.
    pub fn drain(&self) -> Result<()> {
        let mut discard = [0u8; 10];
        read(self.read_fd, &mut discard)?;
        Ok(())
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        let _ = close(self.read_fd);
        let _ = close(self.write_fd);
    }
}
