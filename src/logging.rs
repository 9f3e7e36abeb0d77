// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Global logger setup, built the same way as the rest of the corpus does
//! it: a `slog` `Logger` behind a `lazy_static`, terminal output duplicated
//! to a file, level controlled through `RUST_LOG` via `slog-envlogger`.

use lazy_static::lazy_static;
use slog::{o, Drain, Duplicate, Level, LevelFilter, Logger};
use std::env;
use std::fs::OpenOptions;

lazy_static! {
    /// Process-wide logger. Every module in this crate logs through it via
    /// the macros re-exported below.
    pub static ref LOGGER: Logger = {
        let level = Level::Trace;

        // slog-envlogger doesn't let us set a default level, so seed RUST_LOG
        // when the host hasn't set one.
        if env::var("RUST_LOG").is_err() {
            env::set_var("RUST_LOG", "info");
        }

        let terminal_decorator = slog_term::TermDecorator::new().build();
        let terminal_drain = slog_term::FullFormat::new(terminal_decorator).build().fuse();
        let terminal_drain = LevelFilter::new(terminal_drain, level).fuse();
        let terminal_drain = slog_envlogger::new(terminal_drain);
        let terminal_drain = slog_async::Async::new(terminal_drain).build().fuse();

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(true)
            .truncate(false)
            .open("/tmp/zeus-driver.log");

        match file {
            Ok(file) => {
                let file_decorator = slog_term::PlainDecorator::new(file);
                let file_drain = slog_term::FullFormat::new(file_decorator).build().fuse();
                let file_drain = LevelFilter::new(file_drain, level).fuse();
                let file_drain = slog_async::Async::new(file_drain).build().fuse();

                let composite_drain = Duplicate::new(terminal_drain, file_drain).fuse();
                Logger::root(composite_drain, o!())
            }
            // if the log file can't be opened (e.g. read-only /tmp in a sandbox),
            // fall back to terminal-only logging rather than panicking
            Err(_) => Logger::root(terminal_drain.fuse(), o!()),
        }
    };
}

/// Re-exports the slog macros bound to the global [`LOGGER`], mirroring how
/// `ii_logging::macros` is consumed throughout the corpus as
/// `use ii_logging::macros::*;`.
pub mod macros {
    macro_rules! trace {
        ($($args:tt)*) => {
            slog::trace!($crate::logging::LOGGER, $($args)*)
        };
    }
    macro_rules! debug {
        ($($args:tt)*) => {
            slog::debug!($crate::logging::LOGGER, $($args)*)
        };
    }
    macro_rules! info {
        ($($args:tt)*) => {
            slog::info!($crate::logging::LOGGER, $($args)*)
        };
    }
    macro_rules! warn {
        ($($args:tt)*) => {
            slog::warn!($crate::logging::LOGGER, $($args)*)
        };
    }
    macro_rules! error {
        ($($args:tt)*) => {
            slog::error!($crate::logging::LOGGER, $($args)*)
        };
    }

    pub(crate) use debug;
    pub(crate) use error;
    pub(crate) use info;
    pub(crate) use trace;
    pub(crate) use warn;
}
