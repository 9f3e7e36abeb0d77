// Copyright (C) 2024 Zeus Driver Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! The at-most-one in-flight work slot and the host callbacks that feed it.
//!
//! A [`Work`] is never cloned: it moves from the host into the slot once,
//! may be submitted against zero or more nonces while it sits there (a chip
//! can answer the same work more than once), and leaves along exactly one
//! path — discarded as surplus, or freed on timeout/flush/send-failure —
//! matching the single-consumption contract in spec.md's Design Notes.

use crate::codec::WORK_PAYLOAD_LEN;

/// One unit of hashing work: an 80-byte block-header candidate plus the
/// difficulty the host wants it hashed against.
pub struct Work {
    pub payload: [u8; WORK_PAYLOAD_LEN],
    pub difficulty: u32,
}

impl Work {
    pub fn new(payload: [u8; WORK_PAYLOAD_LEN], difficulty: u32) -> Self {
        Self { payload, difficulty }
    }
}

/// The host-side callbacks the driver calls into. Kept as a trait so tests
/// can substitute a fake host without a real mining framework.
///
/// `Send + Sync`: held as `Arc<dyn HostWorkProvider>` and called from both
/// the I/O thread and the host's own threads.
pub trait HostWorkProvider: Send + Sync {
    /// Pull one fresh unit of work. May block.
    fn get_work(&self) -> Work;
    /// Hand a nonce found for `work` back to the host; returns whether it
    /// met the host's share target. `work` stays in the slot afterwards —
    /// a chip can emit more than one nonce for the same work, so this does
    /// not release it; only `free_work` does.
    fn submit_nonce(&self, work: &Work, nonce: u32) -> bool;
    /// A work that was pulled from the host but turned out to be surplus
    /// (the slot filled before it arrived) is returned here, unconsumed by
    /// the protocol.
    fn discard_work(&self, work: Work);
    /// A work leaving the slot for good — timeout, flush, send failure, or
    /// after its nonce(s) have been submitted — is released here.
    fn free_work(&self, work: Work);
}

/// The board's current-work slot plus the bookkeeping the I/O loop needs
/// around it (the `sent` flag and the timestamp `mark_sent` records).
#[derive(Default)]
pub struct WorkSlot {
    current: Option<Work>,
    sent: bool,
}

impl WorkSlot {
    pub fn new() -> Self {
        Self {
            current: None,
            sent: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn peek(&self) -> Option<&Work> {
        self.current.as_ref()
    }

    /// Install `work` into the slot if it is still empty. Returns the work
    /// back unchanged if the slot had already been filled by a racing
    /// caller, so the caller can discard the surplus.
    pub fn try_install(&mut self, work: Work) -> Option<Work> {
        if self.current.is_some() {
            Some(work)
        } else {
            self.current = Some(work);
            self.sent = false;
            None
        }
    }

    /// Mark the held work as transmitted. No-op if the slot is empty.
    pub fn mark_sent(&mut self) {
        self.sent = true;
    }

    /// Remove and return the held work, clearing the `sent` flag, for the
    /// caller to free. Used by every path that drains the slot for good:
    /// timeout purge, flush, send failure. Nonce submission does not call
    /// this — it `peek()`s instead, since one work can answer more than
    /// one nonce.
    pub fn take(&mut self) -> Option<Work> {
        self.sent = false;
        self.current.take()
    }
}
