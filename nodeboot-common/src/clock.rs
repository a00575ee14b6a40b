// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Monotonic time source and deadlines.

/// Milliseconds since some fixed point, never going backwards.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at_ms: u64,
}

impl Deadline {
    pub fn after<C: Clock>(clock: &C, timeout_ms: u32) -> Self {
        Self {
            at_ms: clock.now_ms() + timeout_ms as u64,
        }
    }

    pub fn has_elapsed<C: Clock>(&self, clock: &C) -> bool {
        clock.now_ms() >= self.at_ms
    }
}
