// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Half-duplex RS-485 bus carrying COBS-framed postcard frames.

use embedded_hal::digital::OutputPin;
use heapless::Deque;
use nodeboot_common::clock::Clock;
use nodeboot_common::frame::{Frame, FrameAssembler, ENCODED_FRAME_CAPACITY};
use nodeboot_common::transport::{Bus, IdleWait, LineState};
use rp2040_hal as hal;

use crate::peripherals::{BusUart, DePin};

/// Frames received while waiting to transmit, held for the next `receive`.
const PENDING_FRAMES: usize = 8;

/// About two character times at the bus baud rate.
const IDLE_GAP_US: u64 = 200;

/// Longest a single send attempt waits for another node to finish.
const MAX_IDLE_WAIT_US: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum BusError {
    /// Another node kept talking; try again.
    Busy,
    Encode,
    /// Framing, parity or overrun error on the line.
    Line,
}

pub struct UartBus {
    uart: BusUart,
    de_pin: DePin,
    timer: hal::Timer,
    assembler: FrameAssembler,
    pending: Deque<Frame, PENDING_FRAMES>,
}

impl UartBus {
    pub fn new(uart: BusUart, mut de_pin: DePin, timer: hal::Timer) -> Self {
        de_pin.set_low().ok();
        Self {
            uart,
            de_pin,
            timer,
            assembler: FrameAssembler::new(),
            pending: Deque::new(),
        }
    }

    fn now_us(&self) -> u64 {
        self.timer.get_counter().ticks()
    }

    /// Move everything in the RX FIFO through the assembler.
    ///
    /// Returns whether any byte was read.
    fn pump(&mut self) -> Result<bool, BusError> {
        let mut activity = false;
        while self.uart.uart_is_readable() {
            let mut byte = [0u8; 1];
            if self.uart.read_raw(&mut byte).is_err() {
                self.assembler.reset();
                return Err(BusError::Line);
            }
            activity = true;

            if let Some(frame) = self.assembler.push(byte[0]) {
                if self.pending.push_back(frame).is_err() {
                    defmt::warn!("receive queue full, frame dropped");
                }
            }
        }
        Ok(activity)
    }

    /// Keep reading until the line has been quiet for `IDLE_GAP_US`.
    fn wait_for_idle(&mut self) -> Result<(), BusError> {
        let mut wait = IdleWait::new(self.now_us(), IDLE_GAP_US, MAX_IDLE_WAIT_US);
        loop {
            let activity = self.pump()?;
            match wait.observe(self.now_us(), activity) {
                LineState::Quiet => return Ok(()),
                LineState::GaveUp => return Err(BusError::Busy),
                LineState::Active => {}
            }
        }
    }
}

impl Bus for UartBus {
    type Error = BusError;

    fn try_send(&mut self, frame: &Frame) -> Result<(), Self::Error> {
        if self.uart.uart_is_readable() {
            self.wait_for_idle()?;
        }

        let mut buf = [0u8; ENCODED_FRAME_CAPACITY];
        let encoded = postcard::to_slice_cobs(frame, &mut buf).map_err(|_| BusError::Encode)?;

        self.de_pin.set_high().ok();
        self.uart.write_full_blocking(encoded);
        // The FIFO empties before the last stop bit leaves the shifter
        while self.uart.uart_is_busy() {}
        self.de_pin.set_low().ok();

        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<Option<Frame>, Self::Error> {
        let start = self.now_us();
        let budget_us = timeout_ms as u64 * 1000;

        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            self.pump()?;
            if self.pending.is_empty() && self.now_us() - start >= budget_us {
                return Ok(None);
            }
        }
    }
}

/// Millisecond clock backed by the 1 MHz system timer.
pub struct TimerClock {
    timer: hal::Timer,
}

impl TimerClock {
    pub fn new(timer: hal::Timer) -> Self {
        Self { timer }
    }
}

impl Clock for TimerClock {
    fn now_ms(&self) -> u64 {
        self.timer.get_counter().ticks() / 1000
    }
}
