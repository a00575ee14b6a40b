// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Frame transport: retried sends, bounded receives and chunked datagram output.
//!
//! There is no sequence number on the bus. A receiver resynchronizes only on
//! the start marker, so a datagram whose send is abandoned half way simply
//! never completes on the other side.

use crate::datagram::{DatagramEncoder, DatagramError};
use crate::frame::{Frame, FrameError};
use crate::protocol::FRAME_MAX_DATA;

/// Raw bus primitives.
pub trait Bus {
    type Error;

    /// Place one frame on the bus. An error is treated as transient and retried.
    fn try_send(&mut self, frame: &Frame) -> Result<(), Self::Error>;

    /// Wait up to `timeout_ms` for a frame. `Ok(None)` means nothing arrived.
    fn receive(&mut self, timeout_ms: u32) -> Result<Option<Frame>, Self::Error>;
}

#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub enum TransportError<E> {
    /// Every attempt to send a frame failed; carries the last bus error.
    RetriesExhausted(E),
    Datagram(DatagramError),
    Frame(FrameError),
}

impl<E> From<DatagramError> for TransportError<E> {
    fn from(value: DatagramError) -> Self {
        Self::Datagram(value)
    }
}

impl<E> From<FrameError> for TransportError<E> {
    fn from(value: FrameError) -> Self {
        Self::Frame(value)
    }
}

pub struct FrameTransport<B> {
    bus: B,
}

impl<B: Bus> FrameTransport<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Send one frame, retrying up to `max_retries` times after the first attempt.
    pub fn send(&mut self, frame: &Frame, max_retries: u32) -> Result<(), TransportError<B::Error>> {
        let mut attempt = 0;
        loop {
            match self.bus.try_send(frame) {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= max_retries => {
                    boot_warn!("frame 0x{:02x} dropped after {} attempts", frame.id, attempt + 1);
                    return Err(TransportError::RetriesExhausted(e));
                }
                Err(_) => attempt += 1,
            }
        }
    }

    /// Wait for one frame. Bus errors are reported as "no frame".
    pub fn receive(&mut self, timeout_ms: u32) -> Option<Frame> {
        match self.bus.receive(timeout_ms) {
            Ok(frame) => frame,
            Err(_) => {
                boot_debug!("bus receive error");
                None
            }
        }
    }

    /// Encode a datagram and send it frame by frame as `source`.
    ///
    /// The first frame carries the start marker. If any frame exhausts its
    /// retries the remaining chunks are not sent.
    pub fn send_datagram(
        &mut self,
        source: u8,
        destinations: &[u8],
        payload: &[u8],
        max_retries: u32,
    ) -> Result<usize, TransportError<B::Error>> {
        let mut encoder = DatagramEncoder::new(destinations, payload)?;
        let mut chunk = [0u8; FRAME_MAX_DATA];
        let mut frames = 0;

        loop {
            let len = encoder.next_chunk(&mut chunk);
            if len == 0 {
                break;
            }
            let frame = Frame::new(source, frames == 0, &chunk[..len])?;
            self.send(&frame, max_retries)?;
            frames += 1;
        }

        Ok(frames)
    }
}

/// What a transmitter waiting for a shared line currently sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    /// Another node is still talking.
    Active,
    /// Nothing received for at least the idle gap; safe to transmit.
    Quiet,
    /// The line stayed busy past the wait limit.
    GaveUp,
}

/// Tracks a shared half-duplex line until it falls quiet.
///
/// Times are in the caller's tick unit, as long as it is used consistently.
#[derive(Debug, Clone, Copy)]
pub struct IdleWait {
    started: u64,
    last_activity: u64,
    gap: u64,
    limit: u64,
}

impl IdleWait {
    /// Start waiting at `now`, treating it as the last observed activity.
    pub fn new(now: u64, gap: u64, limit: u64) -> Self {
        Self {
            started: now,
            last_activity: now,
            gap,
            limit,
        }
    }

    /// Record whether bytes arrived since the previous call.
    pub fn observe(&mut self, now: u64, activity: bool) -> LineState {
        if activity {
            self.last_activity = now;
        }
        if now.saturating_sub(self.last_activity) >= self.gap {
            LineState::Quiet
        } else if now.saturating_sub(self.started) >= self.limit {
            LineState::GaveUp
        } else {
            LineState::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_is_quiet_once_traffic_stops() {
        let mut wait = IdleWait::new(0, 200, 5_000);

        // another node's frame keeps arriving for a millisecond
        for now in (0..1_000).step_by(50) {
            assert_eq!(wait.observe(now, true), LineState::Active);
        }
        assert_eq!(wait.observe(1_100, false), LineState::Active);
        assert_eq!(wait.observe(1_150, false), LineState::Quiet);
    }

    #[test]
    fn test_continuous_traffic_gives_up_at_limit() {
        let mut wait = IdleWait::new(0, 200, 5_000);
        for now in (0..5_000).step_by(100) {
            assert_eq!(wait.observe(now, true), LineState::Active);
        }
        assert_eq!(wait.observe(5_000, true), LineState::GaveUp);
    }

    #[test]
    fn test_each_wait_starts_fresh() {
        let mut first = IdleWait::new(0, 200, 1_000);
        assert_eq!(first.observe(1_000, true), LineState::GaveUp);

        // a retry gets its own budget and succeeds once the line settles
        let mut retry = IdleWait::new(1_000, 200, 1_000);
        assert_eq!(retry.observe(1_050, true), LineState::Active);
        assert_eq!(retry.observe(1_250, false), LineState::Quiet);
    }
}
