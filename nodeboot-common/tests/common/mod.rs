// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! In-memory flash, bus and clock shared by the integration tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use nodeboot_common::boot_fsm::Settings;
use nodeboot_common::clock::Clock;
use nodeboot_common::config::{write_config, BootloaderConfig};
use nodeboot_common::datagram::{DatagramEncoder, Decoder};
use nodeboot_common::frame::Frame;
use nodeboot_common::protocol::{Response, FRAME_MAX_DATA};
use nodeboot_common::storage::{FlashLayout, Storage};
use nodeboot_common::transport::Bus;
use serde::Serialize;

/// 64 KiB device: 8 KiB bootloader, two config pages, application from 16 KiB.
pub const TEST_LAYOUT: FlashLayout = FlashLayout {
    flash_base: 0x1000_0000,
    flash_size: 0x1_0000,
    page_size: 4096,
    write_size: 256,
    bootloader_addr: 0x1000_0000,
    bootloader_size: 0x2000,
    config_primary: 0x1000_2000,
    config_secondary: 0x1000_3000,
    application_addr: 0x1000_4000,
};

pub const NODE_ID: u8 = 1;
pub const HOST_ID: u8 = 9;
pub const DEVICE_CLASS: &str = "motor-v2";

pub fn test_settings() -> Settings {
    Settings {
        timeout_ms: 5000,
        poll_timeout_ms: 100,
        send_retries: 3,
        layout: TEST_LAYOUT,
    }
}

pub fn test_config() -> BootloaderConfig {
    BootloaderConfig::new(NODE_ID, "test-board", DEVICE_CLASS).unwrap()
}

// =============================================================================
// MemFlash
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFlashError {
    OutOfRange,
    Injected,
}

pub struct MemFlash {
    base: u32,
    pub data: Vec<u8>,
    pub erases: Vec<u32>,
    pub writes: Vec<(u32, usize)>,
    /// Fail every write once this many have succeeded.
    pub fail_writes_after: Option<usize>,
}

impl MemFlash {
    pub fn new(layout: &FlashLayout) -> Self {
        Self {
            base: layout.flash_base,
            data: vec![0xFF; layout.flash_size as usize],
            erases: Vec::new(),
            writes: Vec::new(),
            fail_writes_after: None,
        }
    }

    /// Flash with `config` in both regions.
    pub fn with_config(layout: &FlashLayout, config: &BootloaderConfig) -> Self {
        let mut flash = Self::new(layout);
        write_config(&mut flash, layout.config_primary, config).unwrap();
        write_config(&mut flash, layout.config_secondary, config).unwrap();
        flash.erases.clear();
        flash.writes.clear();
        flash
    }

    fn range(&self, address: u32, len: usize) -> Result<std::ops::Range<usize>, MemFlashError> {
        let start = address
            .checked_sub(self.base)
            .ok_or(MemFlashError::OutOfRange)? as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(MemFlashError::OutOfRange);
        }
        Ok(start..end)
    }

    pub fn slice(&self, address: u32, len: usize) -> &[u8] {
        let range = self.range(address, len).unwrap();
        &self.data[range]
    }

    pub fn fill(&mut self, address: u32, bytes: &[u8]) {
        let range = self.range(address, bytes.len()).unwrap();
        self.data[range].copy_from_slice(bytes);
    }
}

impl Storage for MemFlash {
    type Error = MemFlashError;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn erase_page(&mut self, address: u32) -> Result<(), Self::Error> {
        let range = self.range(address, 4096)?;
        self.data[range].fill(0xFF);
        self.erases.push(address);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        if let Some(limit) = self.fail_writes_after {
            if self.writes.len() >= limit {
                return Err(MemFlashError::Injected);
            }
        }
        let range = self.range(address, data.len())?;
        self.data[range].copy_from_slice(data);
        self.writes.push((address, data.len()));
        Ok(())
    }
}

// =============================================================================
// MockBus / MockClock
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusBusy;

/// Scripted bus. Receiving with nothing queued lets the full timeout pass.
pub struct MockBus {
    pub incoming: VecDeque<Frame>,
    pub sent: Vec<Frame>,
    pub send_attempts: usize,
    /// Number of upcoming send attempts that fail.
    pub failing_sends: usize,
    /// Fail every send once this many frames went out.
    pub fail_after_sent: Option<usize>,
    pub receive_calls: usize,
    time: Rc<Cell<u64>>,
}

impl MockBus {
    pub fn new(time: Rc<Cell<u64>>) -> Self {
        Self {
            incoming: VecDeque::new(),
            sent: Vec::new(),
            send_attempts: 0,
            failing_sends: 0,
            fail_after_sent: None,
            receive_calls: 0,
            time,
        }
    }

    pub fn queue(&mut self, frames: impl IntoIterator<Item = Frame>) {
        self.incoming.extend(frames);
    }
}

impl Bus for MockBus {
    type Error = BusBusy;

    fn try_send(&mut self, frame: &Frame) -> Result<(), Self::Error> {
        self.send_attempts += 1;
        if self.failing_sends > 0 {
            self.failing_sends -= 1;
            return Err(BusBusy);
        }
        if self.fail_after_sent.is_some_and(|n| self.sent.len() >= n) {
            return Err(BusBusy);
        }
        self.sent.push(frame.clone());
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<Option<Frame>, Self::Error> {
        self.receive_calls += 1;
        match self.incoming.pop_front() {
            Some(frame) => {
                self.time.set(self.time.get() + 1);
                Ok(Some(frame))
            }
            None => {
                self.time.set(self.time.get() + timeout_ms as u64);
                Ok(None)
            }
        }
    }
}

#[derive(Clone)]
pub struct MockClock {
    time: Rc<Cell<u64>>,
}

impl MockClock {
    pub fn new(time: Rc<Cell<u64>>) -> Self {
        Self { time }
    }

    pub fn advance(&self, ms: u64) {
        self.time.set(self.time.get() + ms);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.time.get()
    }
}

pub fn bus_and_clock() -> (MockBus, MockClock) {
    let time = Rc::new(Cell::new(0));
    (MockBus::new(time.clone()), MockClock::new(time))
}

// =============================================================================
// Datagram helpers
// =============================================================================

/// The frames a node with id `source` would put on the bus.
pub fn datagram_frames(source: u8, destinations: &[u8], payload: &[u8]) -> Vec<Frame> {
    let mut encoder = DatagramEncoder::new(destinations, payload).unwrap();
    let mut chunk = [0u8; FRAME_MAX_DATA];
    let mut frames = Vec::new();
    loop {
        let n = encoder.next_chunk(&mut chunk);
        if n == 0 {
            break;
        }
        frames.push(Frame::new(source, frames.is_empty(), &chunk[..n]).unwrap());
    }
    frames
}

/// Command payload: index byte followed by postcard arguments.
pub fn command<T: Serialize>(index: u8, args: &T) -> Vec<u8> {
    let mut payload = vec![index];
    payload.extend(postcard::to_allocvec(args).unwrap());
    payload
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub source: u8,
    pub destinations: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Reassemble every valid datagram found in `frames`.
pub fn decode_frames(frames: &[Frame]) -> Vec<Received> {
    let mut decoder = Box::new(Decoder::new());
    let mut out = Vec::new();
    for frame in frames {
        if frame.is_start_of_datagram() {
            decoder.start();
        }
        decoder.feed_all(&frame.data);
        if decoder.is_complete() {
            if decoder.is_valid() {
                out.push(Received {
                    source: frame.source(),
                    destinations: decoder.destinations().to_vec(),
                    payload: decoder.payload().to_vec(),
                });
            }
            decoder.start();
        }
    }
    out
}

pub fn parse_response(payload: &[u8]) -> Response<'_> {
    postcard::from_bytes(payload).unwrap()
}
