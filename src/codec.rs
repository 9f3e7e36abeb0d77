// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Wire format for the Zeus command/event packets.
//!
//! A command packet is 84 bytes: a 4-byte header (frequency code, its
//! complement, and a big-endian difficulty code) followed by the 80-byte
//! work payload, byte-reversed. An event packet is a single big-endian
//! `u32` nonce.

use byteorder::{BigEndian, ByteOrder};

use crate::config::{CLK_MAX, CLK_MIN};

/// Size of a command packet sent to the board.
pub const COMMAND_PKT_LEN: usize = 84;
/// Size of an event packet read back from the board.
pub const EVENT_PKT_LEN: usize = 4;
/// Size of the raw work payload embedded in a command packet.
pub const WORK_PAYLOAD_LEN: usize = 80;

/// Golden calibration payload and the nonce it is expected to produce.
pub const GOLDEN_OB: &str = concat!(
    "00038000063b0b1b028f32535e900609c15dc49a42b1d8492a6dd4f8f15295c",
    "989a1decf584a6aa93be26066d3185f55ef635b5865a7a79b7fa74121a6bb81",
    "9da416328a9bd2f8cef72794bf02000000"
);
/// Priming payload sent twice at the init clock and twice at the real clock
/// before the golden check (or before normal operation, if the check is
/// skipped).
pub const GOLDEN_OB2: &str = concat!(
    "c00278894532091be6f16a5381ad33619dacb9e6a4a6e79956aac97b51112bf",
    "b93dc450b8fc765181a344b6244d42d78625f5c39463bbfdc10405ff711dc12",
    "22dd065b015ac9c2c66e28da7202000000"
);
/// Expected nonce for [`GOLDEN_OB`] at the calibration frequency: the chip's
/// known-answer response, read as a plain big-endian `u32` off the wire.
pub const GOLDEN_NONCE: u32 = 0x268d_0300;
/// `0xD26` hashes is the distance covered between send and the golden
/// nonce; dividing it by the measured round-trip time gives
/// `golden_speed_per_core`.
pub const GOLDEN_NONCE_DISTANCE: u64 = 0x0d26;

/// Convert a requested chip clock (MHz, already clamped into
/// `[CLK_MIN, CLK_MAX]`) into the single-byte frequency code the chips
/// understand.
pub fn clk_to_freqcode(clk_mhz: u32) -> u8 {
    let clk = clk_mhz.clamp(CLK_MIN, CLK_MAX);
    ((clk as f64) * 2.0 / 3.0) as u8
}

/// Smallest power of two that is `>= min`, capped at 1024 (the largest chain
/// this protocol's 10-bit chip field can address).
pub fn lowest_pow2(min: usize) -> usize {
    let mut i = 1usize;
    while i < 1024 {
        if min <= i {
            return i;
        }
        i *= 2;
    }
    1024
}

/// Base-2 logarithm, truncated towards zero, of a positive integer.
pub fn log2(value: usize) -> u32 {
    let mut value = value;
    let mut x = 0;
    while value > 1 {
        value >>= 1;
        x += 1;
    }
    x
}

/// Recover the originating chip index from a decoded nonce, given the chain's
/// chip address width in bits (`log2(chips_count_max)`).
///
/// The chip address occupies bits 19-28 of the nonce; only the
/// `bit_num` most significant bits of that field distinguish chips, and they
/// arrive bit-reversed.
pub fn chip_index(nonce: u32, bit_num: u32) -> u32 {
    let mut value = (nonce & 0x1ff8_0000) >> (29 - bit_num);
    let mut newvalue = 0u32;
    for _ in 0..bit_num {
        newvalue <<= 1;
        newvalue += value & 0x01;
        value >>= 1;
    }
    newvalue
}

/// Core that produced a decoded nonce: the 3 highest bits.
pub fn core_index(nonce: u32) -> u32 {
    (nonce & 0xe000_0000) >> 29
}

/// Difficulty code sent in a command packet header: `0xffff / max(diff, 1)`.
pub fn diff_code(difficulty: u32) -> u16 {
    let diff = difficulty.max(1);
    (0xffffu32 / diff) as u16
}

/// Build an 84-byte command packet for `payload` (the 80-byte big-endian
/// work/midstate data) at the given frequency code and difficulty.
///
/// `payload` must be exactly [`WORK_PAYLOAD_LEN`] bytes.
pub fn encode_command(freqcode: u8, difficulty: u32, payload: &[u8]) -> [u8; COMMAND_PKT_LEN] {
    assert_eq!(payload.len(), WORK_PAYLOAD_LEN);

    let mut pkt = [0u8; COMMAND_PKT_LEN];
    pkt[0] = freqcode;
    pkt[1] = !freqcode;
    BigEndian::write_u16(&mut pkt[2..4], diff_code(difficulty));

    pkt[4..].copy_from_slice(payload);
    pkt[4..].reverse();

    pkt
}

/// Build a priming command packet from one of the fixed golden payloads,
/// stamped with the calibration frequency code. Used only during detection.
pub fn encode_priming(freqcode: u8, golden_hex: &str) -> [u8; COMMAND_PKT_LEN] {
    let mut pkt = [0u8; COMMAND_PKT_LEN];
    hex_decode(golden_hex, &mut pkt[4..]);
    pkt[0] = freqcode;
    pkt[1] = !freqcode;
    pkt[2] = 0x00;
    pkt[3] = 0x01;
    pkt
}

/// Decode a 4-byte event packet into its nonce.
pub fn decode_event(evtpkt: &[u8]) -> u32 {
    BigEndian::read_u32(evtpkt)
}

fn hex_decode(hex: &str, out: &mut [u8]) {
    let bytes = hex.as_bytes();
    assert_eq!(bytes.len(), out.len() * 2);
    for (i, chunk) in bytes.chunks(2).enumerate() {
        let hi = (chunk[0] as char).to_digit(16).expect("invalid hex digit");
        let lo = (chunk[1] as char).to_digit(16).expect("invalid hex digit");
        out[i] = ((hi << 4) | lo) as u8;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clk_to_freqcode_matches_known_points() {
        assert_eq!(clk_to_freqcode(150), 100);
        assert_eq!(clk_to_freqcode(328), 218);
    }

    #[test]
    fn clk_to_freqcode_clamps_out_of_range() {
        assert_eq!(clk_to_freqcode(1000), clk_to_freqcode(CLK_MAX));
        assert_eq!(clk_to_freqcode(0), clk_to_freqcode(CLK_MIN));
    }

    #[test]
    fn lowest_pow2_boundaries() {
        assert_eq!(lowest_pow2(1), 1);
        assert_eq!(lowest_pow2(2), 2);
        assert_eq!(lowest_pow2(3), 4);
        assert_eq!(lowest_pow2(6), 8);
        assert_eq!(lowest_pow2(1024), 1024);
        assert_eq!(lowest_pow2(2000), 1024);
    }

    #[test]
    fn log2_matches_pow2_inputs() {
        assert_eq!(log2(1), 0);
        assert_eq!(log2(2), 1);
        assert_eq!(log2(8), 3);
        assert_eq!(log2(1024), 10);
    }

    #[test]
    fn chip_index_zero_bits_is_always_zero() {
        assert_eq!(chip_index(0xffff_ffff, 0), 0);
    }

    #[test]
    fn chip_index_over_all_bit_widths_stays_in_range() {
        for bit_num in 0..=10u32 {
            let max_chips = 1u32 << bit_num;
            for nonce in [0u32, 0x1ff8_0000, 0xffff_ffff, 0xdead_beef] {
                let chip = chip_index(nonce, bit_num);
                assert!(chip < max_chips.max(1));
            }
        }
    }

    #[test]
    fn core_index_reads_top_three_bits() {
        assert_eq!(core_index(0x0000_0000), 0);
        assert_eq!(core_index(0xe000_0000), 7);
        assert_eq!(core_index(0x2000_0000), 1);
    }

    #[test]
    fn diff_code_clamps_zero_difficulty_to_one() {
        assert_eq!(diff_code(0), diff_code(1));
        assert_eq!(diff_code(1), 0xffff);
    }

    #[test]
    fn diff_code_divides_down_for_higher_difficulty() {
        assert_eq!(diff_code(2), 0xffff / 2);
    }

    #[test]
    fn encode_command_reverses_payload_and_sets_header() {
        let mut payload = [0u8; WORK_PAYLOAD_LEN];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = i as u8;
        }
        let pkt = encode_command(0x64, 1, &payload);
        assert_eq!(pkt[0], 0x64);
        assert_eq!(pkt[1], !0x64u8);
        assert_eq!(BigEndian::read_u16(&pkt[2..4]), 0xffff);
        assert_eq!(pkt[4], payload[WORK_PAYLOAD_LEN - 1]);
        assert_eq!(pkt[COMMAND_PKT_LEN - 1], payload[0]);
    }

    #[test]
    fn decode_event_is_big_endian() {
        assert_eq!(decode_event(&[0x26, 0x8d, 0x03, 0x00]), 0x268d_0300);
    }

    #[test]
    fn encode_priming_stamps_header_over_fixed_payload() {
        let pkt = encode_priming(0x64, GOLDEN_OB2);
        assert_eq!(pkt.len(), COMMAND_PKT_LEN);
        assert_eq!(pkt[0], 0x64);
        assert_eq!(pkt[1], !0x64u8);
        assert_eq!(pkt[2], 0x00);
        assert_eq!(pkt[3], 0x01);
    }
}
