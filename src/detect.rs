// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Board detection and calibration, followed step for step from
//! `zeus_detect_one` in the original driver: open, prime the chips at an
//! init clock then the real clock, optionally run the golden-nonce
//! self-test, and derive the timing a board will run with for the rest of
//! its life.

use std::io::{Read, Write};
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::board::{bump_global_chips_count_max, BoardStatic};
use crate::codec::{
    clk_to_freqcode, decode_event, encode_priming, log2, EVENT_PKT_LEN, GOLDEN_NONCE,
    GOLDEN_NONCE_DISTANCE, GOLDEN_OB, GOLDEN_OB2,
};
use crate::config::{clamp_clk, GlobalOptions, CORES_PER_CHIP};
use crate::error::{Error, ErrorKind, Result};
use crate::logging::macros::*;
use crate::session::{Session, Transport};

/// Retry budget for the golden-nonce read: the detection read loop retries
/// up to this many zero-length reads before giving up. Must not be reused
/// during normal operation (spec's Read loop semantics note) — the
/// multiplexed wait in the I/O loop replaces it there.
const GOLDEN_READ_RETRIES: u32 = 100;

pub struct DetectionResult {
    pub info: BoardStatic,
    pub chip_clk: u32,
    pub freqcode: u8,
    pub work_timeout: Duration,
}

/// Probes a single candidate device path and, if a board answers, returns
/// its calibrated static attributes. Never retries on failure — the
/// surrounding serial-path enumerator (out of scope here) decides whether
/// to try again.
pub fn detect_one(devpath: &str, baud: u32, opts: &GlobalOptions) -> Result<DetectionResult> {
    let chips_count_max = bump_global_chips_count_max(opts.chips_count);

    info!("Zeus Detect: Attempting to open {}", devpath);
    let mut port = Session::open_for_detect(devpath, baud).map_err(|e| {
        error!("Zeus Detect: Failed to open {}", devpath);
        Error::from(ErrorKind::Detect(e.to_string()))
    })?;

    let freqcode = clk_to_freqcode(clamp_clk(opts.chip_clk));
    let freqcode_init = if opts.chip_clk > 150 {
        clk_to_freqcode(165)
    } else {
        clk_to_freqcode(139)
    };

    prime(&mut port, freqcode_init)?;
    prime(&mut port, freqcode)?;

    let golden_speed_per_core = if opts.skip_golden_check {
        (((opts.chip_clk as f64) * 2.0 / 3.0) * 1024.0 / 8.0) as u64
    } else {
        run_golden_check(&mut port, devpath, freqcode)?
    };

    let cores_per_chip = CORES_PER_CHIP;
    let chips_count = opts.chips_count;
    let chips_bit_num = log2(chips_count_max);

    let work_timeout_us =
        (1_000_000u64 * (1u64 << 32)) / (golden_speed_per_core * cores_per_chip as u64 * chips_count as u64);
    let work_timeout = Duration::from_micros(work_timeout_us);

    let mut read_count = ((1u64 << 32) * 10)
        / (cores_per_chip as u64 * chips_count_max as u64 * golden_speed_per_core * 2);
    read_count = read_count * 3 / 4;

    info!(
        "Found Zeus at {}: baud={} cores_per_chip={} chips_count={}",
        devpath, baud, cores_per_chip, chips_count
    );

    Ok(DetectionResult {
        info: BoardStatic {
            device_path: devpath.to_string(),
            baud,
            cores_per_chip,
            chips_count,
            chips_count_max,
            chips_bit_num,
            golden_speed_per_core,
            read_count: read_count as u32,
        },
        chip_clk: opts.chip_clk,
        freqcode,
        work_timeout,
    })
}

/// Send a priming payload twice, 1 second apart, purging input after each
/// (the "from 150M step to the high or low speed" dance in the original
/// driver).
fn prime(port: &mut Box<dyn Transport>, freqcode: u8) -> Result<()> {
    let pkt = encode_priming(freqcode, GOLDEN_OB2);
    for _ in 0..2 {
        port.write_all(&pkt)?;
        sleep(Duration::from_secs(1));
        port.purge_input()?;
    }
    Ok(())
}

/// Send the golden-nonce known-answer payload and check the board's
/// response, deriving `golden_speed_per_core` from the round-trip time.
fn run_golden_check(port: &mut Box<dyn Transport>, devpath: &str, freqcode: u8) -> Result<u64> {
    let pkt = encode_priming(freqcode, GOLDEN_OB);

    let t_send = Instant::now();
    port.write_all(&pkt)?;

    let mut evtpkt = [0u8; EVENT_PKT_LEN];
    let mut total = 0usize;
    let mut retries = 0u32;
    let mut t_first_byte = None;
    while total < evtpkt.len() {
        match port.read(&mut evtpkt[total..]) {
            Ok(0) => {
                retries += 1;
                if retries >= GOLDEN_READ_RETRIES {
                    break;
                }
            }
            Ok(n) => {
                if total == 0 {
                    t_first_byte = Some(Instant::now());
                }
                total += n;
            }
            Err(e) => return Err(Error::from(ErrorKind::Detect(e.to_string()))),
        }
    }

    let nonce = decode_event(&evtpkt);
    if nonce != GOLDEN_NONCE {
        error!(
            "Zeus Detect: Test failed at {}: got {:08x}, should be: {:08x}",
            devpath, nonce, GOLDEN_NONCE
        );
        return Err(Error::from(ErrorKind::Detect(format!(
            "golden nonce mismatch: got {:08x}",
            nonce
        ))));
    }

    let t_first_byte = t_first_byte.ok_or_else(|| {
        Error::from(ErrorKind::Detect(
            "golden nonce matched but no bytes were timestamped".to_string(),
        ))
    })?;
    let elapsed = t_first_byte.duration_since(t_send).as_secs_f64();
    let golden_speed_per_core = (GOLDEN_NONCE_DISTANCE as f64 / elapsed) as u64;

    debug!("Test succeeded at {}: got {:08x}", devpath, nonce);
    Ok(golden_speed_per_core)
}
