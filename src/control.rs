// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Thread-safe operations the host calls into: `scanwork`, `flush_work`,
//! `set_device`, `shutdown`, and the two stats hooks. Grounded in
//! `zeus_scanwork`/`zeus_flush_work`/`zeus_set_device`/`zeus_shutdown`/
//! `zeus_api_stats`/`zeus_get_statline_before`.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::board::Board;
use crate::codec::clk_to_freqcode;
use crate::config::{CLK_MAX, CLK_MIN};
use crate::io_loop;
use crate::logging::macros::*;
use crate::stats::{ApiDebugStats, ApiStats};

/// Host-facing handle to a detected, running board. Wraps the `Arc<Board>`
/// plus the join handle for its I/O thread.
pub struct BoardHandle {
    board: Arc<Board>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
    debug: bool,
}

impl BoardHandle {
    pub fn new(board: Arc<Board>, debug: bool) -> Self {
        Self {
            board,
            io_thread: Mutex::new(None),
            debug,
        }
    }

    /// Start the dedicated I/O thread. Idempotent: calling it again while a
    /// thread is already running is a no-op.
    pub fn start_io_thread(&self) {
        let mut slot = self.io_thread.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let board = self.board.clone();
        *slot = Some(std::thread::spawn(move || io_loop::run(board)));
    }

    /// Sleep 100 ms, then report an estimated hash count for the elapsed
    /// time since the previous call, saturating at `u32::MAX` the way the
    /// host's hashrate reporting expects.
    pub fn scanwork(&self) -> u64 {
        std::thread::sleep(std::time::Duration::from_millis(100));

        let mut state = self.board.state.lock().unwrap();
        let now = Instant::now();
        let elapsed_s = now.duration_since(state.scanwork_time).as_secs_f64();
        state.scanwork_time = now;

        let estimate = elapsed_s
            * self.board.info.golden_speed_per_core as f64
            * self.board.info.cores_per_chip as f64
            * self.board.info.chips_count as f64;

        (estimate as u64).min(u32::MAX as u64)
    }

    /// Purge the current work and wake the I/O thread. Always wakes even
    /// if the slot was already empty.
    pub fn flush_work(&self) {
        {
            let mut state = self.board.state.lock().unwrap();
            if let Some(work) = state.work_slot.take() {
                self.board.host.free_work(work);
            }
        }
        if let Err(e) = self.board.wake.wake() {
            warn!("{}: failed to wake I/O thread: {}", self.board.info.device_path, e);
        } else if self.debug {
            info!("{}: flush_work: tickling I/O thread", self.board.info.device_path);
        }
    }

    /// Alias of [`flush_work`](Self::flush_work) — the host's `update_work`
    /// hook is the same operation under a different name (a fresh piece of
    /// work superseding the one in flight, rather than an abort with
    /// nothing to replace it).
    pub fn update_work(&self) {
        self.flush_work();
    }

    /// `help` / `freq=<int>` / `abortwork=true`. `Ok(None)` means the
    /// setting was applied; `Ok(Some(reply))` and `Err(reply)` both carry a
    /// reply string for the host to surface, mirroring `zeus_set_device`'s
    /// single `replybuf` output (errors and the `help` text share one
    /// channel there).
    pub fn set_device(&self, option: &str, setting: Option<&str>) -> Result<Option<String>, String> {
        match option.to_ascii_lowercase().as_str() {
            "help" => Ok(Some(format!(
                "freq: range {}-{}, abortwork: true/false",
                CLK_MIN, CLK_MAX
            ))),
            "freq" => {
                let setting = setting.filter(|s| !s.is_empty()).ok_or("missing freq setting")?;
                let val: u32 = setting
                    .parse()
                    .map_err(|_| format!("invalid freq: '{}' valid range {}-{}", setting, CLK_MIN, CLK_MAX))?;
                if val < CLK_MIN || val > CLK_MAX {
                    return Err(format!(
                        "invalid freq: '{}' valid range {}-{}",
                        setting, CLK_MIN, CLK_MAX
                    ));
                }
                let mut state = self.board.state.lock().unwrap();
                state.next_chip_clk = Some(val);
                state.freqcode = clk_to_freqcode(val);
                Ok(None)
            }
            "abortwork" => {
                let setting = setting.filter(|s| !s.is_empty()).ok_or("missing true/false")?;
                if !setting.eq_ignore_ascii_case("true") {
                    return Err("not aborting current work".to_string());
                }
                self.flush_work();
                Ok(None)
            }
            _ => Err(format!("Unknown option: {}", option)),
        }
    }

    /// Set the shutdown flag and join the I/O thread. The thread notices
    /// the flag at the top of its next iteration — it is not explicitly
    /// woken, matching the original driver's shutdown path.
    pub fn shutdown(&self) {
        info!("{}: Shutting down", self.board.info.device_path);
        self.board.request_shutdown();
        if let Some(handle) = self.io_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        let mut state = self.board.state.lock().unwrap();
        state.session.close();
    }

    pub fn get_api_stats(&self) -> ApiStats {
        let state = self.board.state.lock().unwrap();
        let info = &self.board.info;

        let khs_core = info.golden_speed_per_core as f64 / 1000.0;
        let khs_chip = khs_core * info.cores_per_chip as f64;
        let khs_board = khs_chip * info.chips_count as f64;

        let time_on_current_work = state
            .work_start
            .map(|start| start.elapsed())
            .unwrap_or_default();

        ApiStats {
            device_name: info.device_name().to_string(),
            khs_core,
            khs_chip,
            khs_board,
            frequency: state.chip_clk,
            cores_per_chip: info.cores_per_chip,
            chips_count: info.chips_count,
            time_on_current_work,
            work_timeout: state.work_timeout,
            debug: self.debug.then(|| ApiDebugStats {
                chips_count_max: info.chips_count_max,
                chips_bit_num: info.chips_bit_num,
                read_count: info.read_count,
            }),
        }
    }

    pub fn get_statline_before(&self) -> String {
        let state = self.board.state.lock().unwrap();
        format!("{:<9}  {:>4} MHz  ", self.board.info.device_name(), state.chip_clk)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::board::BoardState;
    use crate::board::BoardStatic;
    use crate::pipe::WakePipe;
    use crate::session::Session;
    use crate::work::{HostWorkProvider, Work};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct NullHost;
    impl HostWorkProvider for NullHost {
        fn get_work(&self) -> Work {
            Work::new([0u8; 80], 1)
        }
        fn submit_nonce(&self, _work: &Work, _nonce: u32) -> bool {
            true
        }
        fn discard_work(&self, _work: Work) {}
        fn free_work(&self, _work: Work) {}
    }

    fn make_board() -> Arc<Board> {
        let info = BoardStatic {
            device_path: "/dev/ttyUSB7".to_string(),
            baud: 115_200,
            cores_per_chip: 8,
            chips_count: 4,
            chips_count_max: 4,
            chips_bit_num: 2,
            golden_speed_per_core: 1_000,
            read_count: 10,
        };
        let state = BoardState::new(
            Session::new("/dev/ttyUSB7", 115_200),
            328,
            0,
            Duration::from_secs(5),
            4,
        );
        Arc::new(Board {
            info,
            state: Mutex::new(state),
            wake: WakePipe::new().unwrap(),
            host: Arc::new(NullHost),
            shutdown: AtomicBool::new(false),
        })
    }

    #[test]
    fn set_device_help_returns_descriptor() {
        let handle = BoardHandle::new(make_board(), false);
        let reply = handle.set_device("help", None).unwrap();
        assert!(reply.unwrap().contains("freq: range"));
    }

    #[test]
    fn set_device_freq_out_of_range_is_rejected() {
        let handle = BoardHandle::new(make_board(), false);
        assert!(handle.set_device("freq", Some("9999")).is_err());
    }

    #[test]
    fn set_device_freq_in_range_sets_pending_clock() {
        let handle = BoardHandle::new(make_board(), false);
        assert!(handle.set_device("freq", Some("200")).is_ok());
        let state = handle.board.state.lock().unwrap();
        assert_eq!(state.next_chip_clk, Some(200));
    }

    #[test]
    fn set_device_unknown_option_is_rejected() {
        let handle = BoardHandle::new(make_board(), false);
        assert!(handle.set_device("bogus", None).is_err());
    }

    #[test]
    fn get_statline_before_contains_device_name_and_clock() {
        let handle = BoardHandle::new(make_board(), false);
        let line = handle.get_statline_before();
        assert!(line.contains("ttyUSB7"));
        assert!(line.contains("328"));
    }

    #[test]
    fn get_api_stats_omits_debug_fields_unless_enabled() {
        let handle = BoardHandle::new(make_board(), false);
        assert!(handle.get_api_stats().debug.is_none());

        let debug_handle = BoardHandle::new(make_board(), true);
        assert!(debug_handle.get_api_stats().debug.is_some());
    }
}
