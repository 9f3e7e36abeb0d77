// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The per-board instance: attributes fixed at detection time, the
//! mutex-guarded mutable state two threads and the host share, and the
//! `Arc`-shared handle joining them with the wake pipe and the host
//! callback object.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;

use crate::codec::{encode_command, lowest_pow2};
use crate::config::{CORES_PER_CHIP, MAX_CHIPS};
use crate::pipe::WakePipe;
use crate::session::Session;
use crate::work::{HostWorkProvider, WorkSlot};

lazy_static! {
    /// Process-wide running maximum of `chips_count_max` across every board
    /// detected so far, mirroring `opt_zeus_chips_count_max` (a file-scope
    /// `static` in the original driver, not a per-board field). See
    /// DESIGN.md's Open Question decision on this before changing it: a
    /// board detected later can widen every earlier board's `bit_num`.
    static ref CHIPS_COUNT_MAX: Mutex<usize> = Mutex::new(1);
}

/// Fold `declared_chips_count` into the process-wide maximum and return the
/// (possibly unchanged) new global value, rounded up to a power of two.
pub fn bump_global_chips_count_max(declared_chips_count: usize) -> usize {
    let mut max = CHIPS_COUNT_MAX.lock().unwrap();
    if declared_chips_count > *max {
        *max = lowest_pow2(declared_chips_count);
    }
    *max
}

#[cfg(test)]
pub(crate) fn reset_global_chips_count_max_for_test() {
    *CHIPS_COUNT_MAX.lock().unwrap() = 1;
}

/// Attributes fixed once detection succeeds; never mutated afterwards.
pub struct BoardStatic {
    pub device_path: String,
    pub baud: u32,
    pub cores_per_chip: usize,
    /// Declared chips-count, C.
    pub chips_count: usize,
    /// Rounded-up power-of-two chips-count-max, M (process-wide at the time
    /// of detection).
    pub chips_count_max: usize,
    /// log2(M).
    pub chips_bit_num: u32,
    pub golden_speed_per_core: u64,
    pub read_count: u32,
}

impl BoardStatic {
    pub fn device_name(&self) -> &str {
        self.device_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.device_path)
    }
}

/// Attributes mutated across the board lifetime, all guarded by the same
/// lock (`Board::state`).
pub struct BoardState {
    pub session: Session,
    pub work_slot: WorkSlot,
    pub work_start: Option<Instant>,
    pub work_end: Option<Instant>,
    pub scanwork_time: Instant,
    pub chip_clk: u32,
    pub next_chip_clk: Option<u32>,
    pub freqcode: u8,
    pub work_timeout: Duration,
    /// `nonce_count[chip][core]`.
    pub nonce_count: Vec<Vec<u64>>,
    /// `error_count[chip][core]`.
    pub error_count: Vec<Vec<u64>>,
}

impl BoardState {
    pub fn new(
        session: Session,
        chip_clk: u32,
        freqcode: u8,
        work_timeout: Duration,
        chips_count_max: usize,
    ) -> Self {
        let chips = chips_count_max.min(MAX_CHIPS);
        Self {
            session,
            work_slot: WorkSlot::new(),
            work_start: None,
            work_end: None,
            scanwork_time: Instant::now(),
            chip_clk,
            next_chip_clk: None,
            freqcode,
            work_timeout,
            nonce_count: vec![vec![0u64; CORES_PER_CHIP]; chips],
            error_count: vec![vec![0u64; CORES_PER_CHIP]; chips],
        }
    }

    /// Record a decoded nonce's origin, dropping it silently if the chip or
    /// core index is out of range (spec.md §4.1's protocol-anomaly case).
    pub fn record_nonce(&mut self, chip: u32, core: u32, valid: bool) -> bool {
        let (chip, core) = (chip as usize, core as usize);
        if chip >= self.nonce_count.len() || core >= CORES_PER_CHIP {
            return false;
        }
        self.nonce_count[chip][core] += 1;
        if !valid {
            self.error_count[chip][core] += 1;
        }
        true
    }

    /// Build and transmit a command packet for the slot's held work, if any
    /// is present and not yet sent. Returns `None` when there is nothing to
    /// send (slot empty, or already sent and awaiting a response).
    pub fn send_pending_work(&mut self) -> Option<std::io::Result<()>> {
        if self.work_slot.is_empty() || self.work_slot.is_sent() {
            return None;
        }
        let freqcode = self.freqcode;
        let pkt = {
            let work = self.work_slot.peek()?;
            encode_command(freqcode, work.difficulty, &work.payload)
        };
        let transport = self.session.transport_mut()?;
        Some(std::io::Write::write_all(transport, &pkt))
    }

    /// Mark the held work as transmitted and, if a live clock change is
    /// pending, promote it now that the freqcode-bearing packet has gone
    /// out (spec.md §4.4's `mark_sent`).
    pub fn mark_sent_and_promote_clock(&mut self) {
        self.work_slot.mark_sent();
        self.work_start = Some(Instant::now());
        if let Some(next) = self.next_chip_clk.take() {
            self.chip_clk = next;
        }
    }
}

/// The `Arc`-shared per-board handle: static attributes, the mutex-guarded
/// state, the wake pipe, the host callback object, and the shutdown flag
/// the I/O loop checks at the top of every iteration.
pub struct Board {
    pub info: BoardStatic,
    pub state: Mutex<BoardState>,
    pub wake: WakePipe,
    pub host: Arc<dyn HostWorkProvider>,
    pub shutdown: AtomicBool,
}

impl Board {
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
