// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Detection-time configuration inputs.
//!
//! Building these from a command line or a config file is the host's job
//! (see spec.md's Non-goals); this module only defines the shape the host
//! hands us, with `serde::Deserialize` so a host that does use a config
//! file can still deserialize straight into it.

use serde::Deserialize;

/// Lowest chip clock the hardware will accept, in MHz.
pub const CLK_MIN: u32 = 100;
/// Highest chip clock the hardware will accept, in MHz.
pub const CLK_MAX: u32 = 350;

/// Fixed UART baud rate for the Zeus command/event link.
pub const ZEUS_IO_SPEED: u32 = 115_200;
/// Hashing cores per chip (fixed by the ASIC).
pub const CORES_PER_CHIP: usize = 8;
/// Upper bound on addressable chips (10-bit chip field in the nonce).
pub const MAX_CHIPS: usize = 1024;

/// Read-fault timeout granularity used when opening the serial port,
/// expressed in deciseconds (matches `ZEUS_READ_FAULT_DECISECONDS`).
pub const READ_FAULT_DECISECONDS: u8 = 10;

/// Per-device maximum accepted difficulty (enforced by the host; the driver
/// only clamps against it defensively when building a command packet).
pub const MAX_DIFF: u32 = 32768;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct GlobalOptions {
    /// Number of chips declared to be chained on the board.
    pub chips_count: usize,
    /// Desired chip clock, MHz. Clamped into `[CLK_MIN, CLK_MAX]` at detection.
    pub chip_clk: u32,
    /// Skip the golden-nonce self-test during detection.
    pub skip_golden_check: bool,
    /// Enable verbose protocol/diagnostic logging.
    pub debug: bool,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            chips_count: 6,
            chip_clk: 328,
            skip_golden_check: false,
            debug: false,
        }
    }
}

/// Clamp a requested clock into the supported range, logging a warning
/// when it had to be adjusted (mirrors `zeus_clk_to_freqcode`'s clamp).
pub fn clamp_clk(clk: u32) -> u32 {
    use crate::logging::macros::*;

    if clk > CLK_MAX {
        warn!("Clock frequency {} too high, resetting to {}", clk, CLK_MAX);
        CLK_MAX
    } else if clk < CLK_MIN {
        warn!("Clock frequency {} too low, resetting to {}", clk, CLK_MIN);
        CLK_MIN
    } else {
        clk
    }
}
