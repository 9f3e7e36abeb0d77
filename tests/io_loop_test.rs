// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Drives the I/O loop end to end against a socketpair-backed fake
//! transport instead of real hardware, covering the normal work cycle,
//! timeout, flush, and descriptor-error scenarios.

use std::io::{Read, Write};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};

use zeus_driver::board::{Board, BoardState, BoardStatic};
use zeus_driver::codec::{clk_to_freqcode, COMMAND_PKT_LEN};
use zeus_driver::control::BoardHandle;
use zeus_driver::io_loop;
use zeus_driver::pipe::WakePipe;
use zeus_driver::session::Session;
use zeus_driver::test_support::{transport_pair, RecordingHost};

fn make_board(work_timeout: Duration) -> (Arc<Board>, std::os::unix::net::UnixStream, Arc<RecordingHost>) {
    let (board_side, device_side) = transport_pair();
    device_side
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let chip_clk = 200u32;
    let freqcode = clk_to_freqcode(chip_clk);
    let session = Session::from_transport("test-fake", 115_200, board_side);
    let state = BoardState::new(session, chip_clk, freqcode, work_timeout, 8);

    let info = BoardStatic {
        device_path: "test-fake".to_string(),
        baud: 115_200,
        cores_per_chip: 8,
        chips_count: 8,
        chips_count_max: 8,
        chips_bit_num: 3,
        golden_speed_per_core: 1_000_000,
        read_count: 10,
    };

    let host = Arc::new(RecordingHost::new());

    let board = Arc::new(Board {
        info,
        state: Mutex::new(state),
        wake: WakePipe::new().unwrap(),
        host: host.clone(),
        shutdown: AtomicBool::new(false),
    });

    (board, device_side, host)
}

fn read_command(device: &mut std::os::unix::net::UnixStream) -> [u8; COMMAND_PKT_LEN] {
    let mut pkt = [0u8; COMMAND_PKT_LEN];
    device.read_exact(&mut pkt).expect("command packet");
    pkt
}

fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// S3 — normal work cycle: one command goes out with the expected header,
/// a simulated nonce response is submitted with the right chip/core.
#[test]
fn normal_work_cycle_submits_decoded_nonce() {
    let (board, mut device, host) = make_board(Duration::from_millis(500));
    let thread_board = board.clone();
    let io_thread = std::thread::spawn(move || io_loop::run(thread_board));

    let pkt = read_command(&mut device);
    let expected_freqcode = clk_to_freqcode(200);
    assert_eq!(pkt[0], expected_freqcode);
    assert_eq!(pkt[1], !expected_freqcode);
    assert_eq!(BigEndian::read_u16(&pkt[2..4]), 0xffff, "difficulty 1 -> diff_code 0xffff");

    device.write_all(&0x8000_0001u32.to_be_bytes()).unwrap();

    assert!(wait_until(|| !host.submitted_nonces().is_empty(), Duration::from_secs(1)));
    assert_eq!(host.submitted_nonces(), vec![0x8000_0001]);

    {
        let state = board.state.lock().unwrap();
        // core = top 3 bits of 0x80000001 = 4; chip = 0 for this payload.
        assert_eq!(state.nonce_count[0][4], 1);
    }

    board.request_shutdown();
    board.wake.wake().unwrap();
    io_thread.join().unwrap();
}

/// A chip can answer the same work with more than one nonce; the slot must
/// stay occupied by that work (not be freed or refilled) across successive
/// reads until it times out or is flushed.
#[test]
fn multiple_nonces_for_one_work_are_all_submitted() {
    let (board, mut device, host) = make_board(Duration::from_millis(500));
    let thread_board = board.clone();
    let io_thread = std::thread::spawn(move || io_loop::run(thread_board));

    let _pkt = read_command(&mut device);

    device.write_all(&0x8000_0001u32.to_be_bytes()).unwrap();
    assert!(wait_until(
        || host.submitted_nonces().len() == 1,
        Duration::from_secs(1)
    ));

    device.write_all(&0x2000_0002u32.to_be_bytes()).unwrap();
    assert!(wait_until(
        || host.submitted_nonces().len() == 2,
        Duration::from_secs(1)
    ));

    assert_eq!(host.submitted_nonces(), vec![0x8000_0001, 0x2000_0002]);
    assert_eq!(
        *host.freed.lock().unwrap(),
        0,
        "work must not be freed after a nonce submission"
    );

    // the slot is still occupied by the same (already-sent) work, so no
    // second command packet should have gone out yet.
    device
        .set_read_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let mut probe = [0u8; 1];
    assert!(device.read(&mut probe).is_err());

    board.request_shutdown();
    board.wake.wake().unwrap();
    io_thread.join().unwrap();
}

/// S4 — a work that never gets a response is purged silently when
/// `work_timeout` elapses; the host sees it freed, not submitted.
#[test]
fn unanswered_work_is_purged_on_timeout() {
    let (board, mut device, host) = make_board(Duration::from_millis(80));
    let thread_board = board.clone();
    let io_thread = std::thread::spawn(move || io_loop::run(thread_board));

    let _pkt = read_command(&mut device);

    assert!(wait_until(
        || *host.freed.lock().unwrap() >= 1,
        Duration::from_secs(1)
    ));
    assert!(host.submitted_nonces().is_empty());

    board.request_shutdown();
    board.wake.wake().unwrap();
    io_thread.join().unwrap();
}

/// S5 — flushing while a work is in flight empties the slot immediately and
/// wakes the loop, which goes on to transmit a fresh work.
#[test]
fn flush_work_wakes_loop_and_reassigns() {
    let (board, mut device, _host) = make_board(Duration::from_secs(5));
    let handle = BoardHandle::new(board.clone(), false);
    handle.start_io_thread();

    let _first = read_command(&mut device);

    handle.flush_work();

    assert!(wait_until(
        || board.state.lock().unwrap().work_slot.is_empty(),
        Duration::from_millis(500)
    ));

    // loop reassigns and transmits a new work without waiting out the
    // (5s) timeout.
    device
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let _second = read_command(&mut device);

    handle.shutdown();
}

/// S6 — the device side hanging up looks like a read error to the board;
/// the loop closes the descriptor and, since the fake path can't actually
/// be reopened, shuts the board down.
#[test]
fn descriptor_error_without_reopen_shuts_board_down() {
    let (board, mut device, _host) = make_board(Duration::from_secs(5));
    let thread_board = board.clone();
    let io_thread = std::thread::spawn(move || io_loop::run(thread_board));

    let _pkt = read_command(&mut device);
    drop(device);

    assert!(wait_until(|| board.is_shutdown(), Duration::from_secs(2)));
    io_thread.join().unwrap();
}
