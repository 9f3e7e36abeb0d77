// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! User-space driver core for a chained-chip Zeus SHA-256 ASIC mining
//! board connected over a fixed-rate UART.
//!
//! This crate owns detection/calibration, the serial protocol state
//! machine, work lifecycle, and I/O fault recovery for one board. Serial
//! path enumeration, CLI/config parsing, share verification, and
//! presenting statistics over a wire API are a surrounding mining
//! framework's job; this crate exposes [`detect`], [`prepare`],
//! [`thread_init`] (or the fused [`detect_and_start`]) and [`BoardHandle`]
//! as the seam between the two — the same stages `zeus_detect`/
//! `zeus_prepare`/`zeus_thread_init` expose in the original driver's
//! `device_drv` table.

pub mod board;
pub mod codec;
pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod io_loop;
pub mod logging;
pub mod pipe;
pub mod session;
pub mod stats;
pub mod test_support;
pub mod work;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use board::{Board, BoardState};
use config::{GlobalOptions, ZEUS_IO_SPEED};
use control::BoardHandle;
use detect::DetectionResult;
use error::Result;
use pipe::WakePipe;
use session::Session;
use work::HostWorkProvider;

pub use board::{BoardStatic};
pub use error::{Error, ErrorKind};
pub use stats::{ApiDebugStats, ApiStats};
pub use work::Work;

/// `zeus_detect_one`'s role in the host's `detect(hotplug)` hook: probe one
/// candidate serial path and, on success, return its calibrated static
/// attributes. Walking the candidate paths and deciding whether `hotplug`
/// means re-probing an already-rejected path is the serial enumerator's
/// job, not this crate's — it calls this once per path.
pub fn detect(devpath: &str, opts: &GlobalOptions) -> Result<DetectionResult> {
    crate::detect::detect_one(devpath, ZEUS_IO_SPEED, opts)
}

/// `zeus_prepare`'s role: allocate the board's resources (mutex-guarded
/// state, wake pipe) from a successful [`detect`] result and register it
/// with the host, without yet starting the I/O thread.
pub fn prepare(
    result: DetectionResult,
    host: Arc<dyn HostWorkProvider>,
    debug: bool,
) -> Result<BoardHandle> {
    let devpath = result.info.device_path.clone();
    let state = BoardState::new(
        Session::new(devpath, result.info.baud),
        result.chip_clk,
        result.freqcode,
        result.work_timeout,
        result.info.chips_count_max,
    );

    let board = Arc::new(Board {
        info: result.info,
        state: Mutex::new(state),
        wake: WakePipe::new()?,
        host,
        shutdown: AtomicBool::new(false),
    });

    Ok(BoardHandle::new(board, debug))
}

/// `zeus_thread_init`'s role: start the dedicated I/O thread for a prepared
/// board. Idempotent (see [`BoardHandle::start_io_thread`]).
pub fn thread_init(handle: &BoardHandle) {
    handle.start_io_thread();
}

/// Probe `devpath` and, on success, build and start a fully running board:
/// [`detect`] + [`prepare`] + [`thread_init`] run back to back for a single
/// candidate path. `host` supplies `get_work`/`submit_nonce`/
/// `discard_work`/`free_work`.
///
/// Returns `Err` without starting anything if no board answers at
/// `devpath` — the caller's enumeration loop (not this crate's concern)
/// decides whether to try the next candidate path.
pub fn detect_and_start(
    devpath: &str,
    opts: &GlobalOptions,
    host: Arc<dyn HostWorkProvider>,
) -> Result<BoardHandle> {
    let result = detect(devpath, opts)?;
    let handle = prepare(result, host, opts.debug)?;
    thread_init(&handle);
    Ok(handle)
}
