// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Stats snapshot the host renders into its own API/UI surface. Shaped
//! after `DevDetailInfo`/`TempInfo` in `bosminer-am1-s9/src/cgminer.rs`;
//! rendering to a wire format is the host's job, so this module stops at an
//! owned struct.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ApiStats {
    pub device_name: String,
    pub khs_core: f64,
    pub khs_chip: f64,
    pub khs_board: f64,
    pub frequency: u32,
    pub cores_per_chip: usize,
    pub chips_count: usize,
    pub time_on_current_work: Duration,
    pub work_timeout: Duration,
    /// Populated only when the board's debug flag is set (diagnostic
    /// fields, not meant for routine monitoring).
    pub debug: Option<ApiDebugStats>,
}

#[derive(Debug, Clone)]
pub struct ApiDebugStats {
    pub chips_count_max: usize,
    pub chips_bit_num: u32,
    pub read_count: u32,
}
