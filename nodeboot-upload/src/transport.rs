// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial bus adapter: bus frames as COBS-framed postcard messages.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use nodeboot_common::clock::Clock;
use nodeboot_common::frame::{Frame, FrameAssembler, ENCODED_FRAME_CAPACITY};
use nodeboot_common::transport::Bus;
use serialport::{ClearBuffer, SerialPort};

/// A serial port wired to an RS-485 transceiver.
pub struct SerialBus {
    port: Box<dyn SerialPort>,
    assembler: FrameAssembler,
}

impl SerialBus {
    pub fn new(port_name: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud)
            .timeout(Duration::from_millis(100))
            .open()
            .with_context(|| format!("Failed to open serial port {}", port_name))?;

        Ok(Self {
            port,
            assembler: FrameAssembler::new(),
        })
    }

    /// Forget anything received so far.
    pub fn clear_input(&mut self) -> Result<()> {
        self.assembler.reset();
        self.port
            .clear(ClearBuffer::Input)
            .context("Failed to clear serial input")
    }
}

impl Bus for SerialBus {
    type Error = anyhow::Error;

    fn try_send(&mut self, frame: &Frame) -> Result<(), Self::Error> {
        let mut buf = [0u8; ENCODED_FRAME_CAPACITY];
        let encoded = postcard::to_slice_cobs(frame, &mut buf)
            .map_err(|e| anyhow!("Failed to serialize frame: {}", e))?;
        self.port
            .write_all(encoded)
            .context("Failed to write to serial port")?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self, timeout_ms: u32) -> Result<Option<Frame>, Self::Error> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let mut byte = [0u8; 1];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.port.set_timeout(remaining)?;

            match self.port.read(&mut byte) {
                Ok(1) => {
                    if let Some(frame) = self.assembler.push(byte[0]) {
                        return Ok(Some(frame));
                    }
                }
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
                Err(e) => return Err(anyhow!("Serial read error: {}", e)),
            }
        }
    }
}

/// Milliseconds since the tool started.
#[derive(Debug, Clone, Copy)]
pub struct HostClock {
    start: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for HostClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
