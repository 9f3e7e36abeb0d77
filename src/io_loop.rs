// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The dedicated per-board I/O thread: the protocol state machine,
//! translated state-for-state from `zeus_io_thread`. The only component
//! that writes the serial descriptor.

use std::sync::Arc;
use std::time::Instant;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use crate::board::Board;
use crate::codec::{chip_index, core_index, decode_event, EVENT_PKT_LEN};

/// Run the I/O loop until shutdown is requested or an unrecoverable reopen
/// failure occurs. Intended to be spawned on its own `std::thread`.
pub fn run(board: Arc<Board>) {
    let pipe_fd = board.wake.read_fd();

    while !board.is_shutdown() {
        let serial_fd = {
            let mut state = board.state.lock().unwrap();
            if !state.session.is_open() && !state.session.reopen() {
                log_error(&board, "Failed to reopen, shutting down");
                board.request_shutdown();
                break;
            }
            state.session.raw_fd()
        };
        let serial_fd = match serial_fd {
            Some(fd) => fd,
            None => continue,
        };

        need_work_assign(&board);

        {
            let mut state = board.state.lock().unwrap();
            match state.send_pending_work() {
                Some(Ok(())) => state.mark_sent_and_promote_clock(),
                Some(Err(e)) => {
                    log_notice(
                        &board,
                        &format!("I/O error while sending work, will attempt to reopen device: {}", e),
                    );
                    purge_work(&board, &mut state);
                    state.session.close();
                    continue;
                }
                None => {}
            }
        }

        let timeout_ms = {
            let state = board.state.lock().unwrap();
            let remaining = match state.work_start {
                Some(start) => state.work_timeout.saturating_sub(start.elapsed()),
                None => state.work_timeout,
            };
            remaining.as_millis().min(i32::MAX as u128) as i32
        };

        let mut fds = [
            PollFd::new(serial_fd, PollFlags::POLLIN),
            PollFd::new(pipe_fd, PollFlags::POLLIN),
        ];
        let retval = match poll(&mut fds, timeout_ms) {
            Ok(n) => n,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                log_notice(&board, &format!("Error on poll (fd={}): {}", serial_fd, e));
                board.request_shutdown();
                break;
            }
        };

        if retval > 0 {
            let serial_revents = fds[0].revents().unwrap_or_else(PollFlags::empty);

            if serial_revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                let mut state = board.state.lock().unwrap();
                purge_work(&board, &mut state);
                state.session.close();
                if state.session.reopen() {
                    continue;
                }
                log_error(&board, "Failed to reopen after descriptor error, shutting down");
                board.request_shutdown();
                break;
            }

            if serial_revents.contains(PollFlags::POLLIN) {
                handle_event_packet(&board);
            }

            let pipe_revents = fds[1].revents().unwrap_or_else(PollFlags::empty);
            if pipe_revents.contains(PollFlags::POLLIN) {
                if board.wake.drain().is_err() {
                    log_error(&board, "Inter-thread pipe closed, miner thread dead?");
                    board.request_shutdown();
                    break;
                }
            }
        } else {
            // timeout: abandon the current work, not an error.
            let mut state = board.state.lock().unwrap();
            purge_work(&board, &mut state);
        }
    }
}

/// Pull one fresh work from the host if the slot is empty. The host call
/// may block, so it happens outside the board lock; if a racing send
/// already filled the slot by the time we re-acquire it, the freshly pulled
/// work is surplus and handed back to the host unused.
fn need_work_assign(board: &Board) {
    let need = board.state.lock().unwrap().work_slot.is_empty();
    if !need {
        return;
    }

    let work = board.host.get_work();

    let surplus = {
        let mut state = board.state.lock().unwrap();
        state.work_slot.try_install(work)
    };
    if let Some(surplus) = surplus {
        board.host.discard_work(surplus);
    }
}

/// Abandon whatever work is currently held, handing it back to the host.
/// Called under the board lock.
fn purge_work(board: &Board, state: &mut crate::board::BoardState) {
    if let Some(work) = state.work_slot.take() {
        board.host.free_work(work);
    }
}

/// Read one event packet, decode its nonce, and route it to the host —
/// or, if the slot was emptied by a flush before the response arrived,
/// drop it silently.
fn handle_event_packet(board: &Board) {
    let mut state = board.state.lock().unwrap();
    state.work_end = Some(Instant::now());

    let evtpkt = {
        let transport = match state.session.transport_mut() {
            Some(t) => t,
            None => return,
        };
        match read_event_packet(transport) {
            Ok(pkt) => pkt,
            Err(e) => {
                log_notice(
                    board,
                    &format!("I/O error while reading response, will attempt to reopen device: {}", e),
                );
                purge_work(board, &mut state);
                state.session.close();
                return;
            }
        }
    };

    if let Err(e) = state.session.flush_input() {
        log_notice(board, &format!("failed to flush input after event packet: {}", e));
    }

    let nonce = decode_event(&evtpkt);

    // The work stays in the slot: the chip can emit multiple nonces for the
    // same work, so only a timeout, a flush, or a send failure (purge_work)
    // releases it. Submitting here never consumes it.
    let valid = match state.work_slot.peek() {
        Some(work) => board.host.submit_nonce(work, nonce),
        None => {
            log_debug(board, "Received nonce for flushed work");
            return;
        }
    };

    let chip = chip_index(nonce, board.info.chips_bit_num);
    let core = core_index(nonce);
    if !state.record_nonce(chip, core, valid) {
        log_info(board, "Corrupt nonce message received, cannot determine chip and core");
    }
}

/// A single read attempt loop bounded the same way `zeus_read_response`'s
/// `zeus_read(..., read_count = 1)` call is: keep reading until the packet
/// is complete, but a single zero-byte read is treated as an I/O fault
/// rather than retried (the generous retry budget is for detection only).
fn read_event_packet(transport: &mut dyn crate::session::Transport) -> std::io::Result<[u8; EVENT_PKT_LEN]> {
    use std::io::Read;

    let mut buf = [0u8; EVENT_PKT_LEN];
    let mut total = 0usize;
    while total < buf.len() {
        let n = transport.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    if total == buf.len() {
        Ok(buf)
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "short event packet read",
        ))
    }
}

fn log_error(board: &Board, msg: &str) {
    use crate::logging::macros::*;
    error!("{}: {}", board.info.device_path, msg);
}

fn log_notice(board: &Board, msg: &str) {
    use crate::logging::macros::*;
    warn!("{}: {}", board.info.device_path, msg);
}

fn log_info(board: &Board, msg: &str) {
    use crate::logging::macros::*;
    info!("{}: {}", board.info.device_path, msg);
}

fn log_debug(board: &Board, msg: &str) {
    use crate::logging::macros::*;
    debug!("{}: {}", board.info.device_path, msg);
}
