// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bootloader control loop - pure logic without hardware dependencies.
//!
//! ```text
//! LOADING_CONFIG -> AWAITING_DATAGRAM (timeout armed | disarmed) -> APPLICATION
//! ```
//!
//! The loop receives frames, reassembles datagrams, dispatches the ones
//! addressed to this node and answers the sender. While the timeout is
//! armed, running out of time leaves for the application. The first valid
//! datagram disarms the timeout for good: once the programming tool has made
//! contact, only an explicit jump command leaves the bootloader.
//!
//! Hardware is reached through [`Bus`], [`Storage`] and [`Clock`], so the
//! whole state machine runs on the host in tests.

use crate::clock::{Clock, Deadline};
use crate::config::{load_config, BootloaderConfig, ConfigError};
use crate::datagram::Decoder;
use crate::dispatch::{self, CommandEntry, Context, Outcome};
use crate::frame::Frame;
use crate::protocol::{
    BOOT_TIMEOUT_MS, OUTPUT_BUF_SIZE, POLL_TIMEOUT_MS, RP2040_LAYOUT, SEND_RETRIES,
};
use crate::storage::{crc32_region, FlashLayout, Storage};
use crate::transport::{Bus, FrameTransport};

/// How the bootloader was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum BootArg {
    Normal,
    /// Stay in the bootloader until told to jump.
    NoTimeout,
}

/// Runtime knobs of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Time without contact before falling back to the application.
    pub timeout_ms: u32,
    /// Upper bound of a single receive; also the timeout check granularity.
    pub poll_timeout_ms: u32,
    pub send_retries: u32,
    pub layout: FlashLayout,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: BOOT_TIMEOUT_MS,
            poll_timeout_ms: POLL_TIMEOUT_MS,
            send_retries: SEND_RETRIES,
            layout: RP2040_LAYOUT,
        }
    }
}

/// Terminal transition out of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// Hand control to the resident application with this configuration.
    Application(BootloaderConfig),
}

pub struct Bootloader<'t, B, S, C> {
    transport: FrameTransport<B>,
    storage: S,
    clock: C,
    table: &'t [CommandEntry<'t, S>],
    settings: Settings,
    config: BootloaderConfig,
    node_id: u8,
    timeout: Option<Deadline>,
    decoder: Decoder,
    output: [u8; OUTPUT_BUF_SIZE],
}

impl<'t, B, S, C> Bootloader<'t, B, S, C>
where
    B: Bus,
    S: Storage,
    C: Clock,
{
    /// Load the configuration and enter `AWAITING_DATAGRAM`.
    ///
    /// Fails only when neither config region validates.
    pub fn boot(
        bus: B,
        mut storage: S,
        clock: C,
        table: &'t [CommandEntry<'t, S>],
        settings: Settings,
        arg: BootArg,
    ) -> Result<Self, ConfigError> {
        let (config, slot) = load_config(&mut storage, &settings.layout)?;
        boot_info!("config loaded from {}, node id {}", slot, config.id);
        Ok(Self::new(bus, storage, clock, table, settings, config, arg))
    }

    pub fn new(
        bus: B,
        storage: S,
        clock: C,
        table: &'t [CommandEntry<'t, S>],
        settings: Settings,
        config: BootloaderConfig,
        arg: BootArg,
    ) -> Self {
        let timeout = match arg {
            BootArg::Normal => Some(Deadline::after(&clock, settings.timeout_ms)),
            BootArg::NoTimeout => None,
        };

        Self {
            transport: FrameTransport::new(bus),
            storage,
            clock,
            table,
            settings,
            node_id: config.id,
            config,
            timeout,
            decoder: Decoder::new(),
            output: [0u8; OUTPUT_BUF_SIZE],
        }
    }

    /// Identity fixed at boot; config updates take effect on the next boot.
    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn config(&self) -> &BootloaderConfig {
        &self.config
    }

    pub fn timeout_armed(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn disarm_timeout(&mut self) {
        self.timeout = None;
    }

    pub fn bus(&self) -> &B {
        self.transport.bus()
    }

    pub fn bus_mut(&mut self) -> &mut B {
        self.transport.bus_mut()
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Loop until the application should be started.
    pub fn run(&mut self) -> Exit {
        loop {
            if let Some(exit) = self.poll() {
                return exit;
            }
        }
    }

    /// One iteration: timeout check, then at most one frame.
    pub fn poll(&mut self) -> Option<Exit> {
        if let Some(deadline) = self.timeout {
            if deadline.has_elapsed(&self.clock) {
                boot_info!("no contact before timeout, starting application");
                return Some(Exit::Application(self.config.clone()));
            }
        }

        let frame = self.transport.receive(self.settings.poll_timeout_ms)?;
        self.handle_frame(&frame)
    }

    /// Feed one frame to the decoder and act on a completed datagram.
    pub fn handle_frame(&mut self, frame: &Frame) -> Option<Exit> {
        if frame.is_start_of_datagram() {
            self.decoder.start();
        }
        self.decoder.feed_all(&frame.data);

        if !self.decoder.is_complete() {
            return None;
        }

        let mut exit = None;
        if self.decoder.is_valid() {
            if self.timeout.take().is_some() {
                boot_info!("contact from node {}, timeout disarmed", frame.source());
            }
            if self.decoder.is_addressed_to(self.node_id) {
                exit = self.dispatch(frame.source());
            }
        } else {
            boot_warn!("dropping datagram with bad crc from node {}", frame.source());
        }

        self.decoder.start();
        exit
    }

    fn dispatch(&mut self, requester: u8) -> Option<Exit> {
        let mut ctx = Context {
            config: &mut self.config,
            storage: &mut self.storage,
            layout: &self.settings.layout,
        };
        let outcome = dispatch::execute(
            self.decoder.payload(),
            self.table,
            &mut self.output,
            &mut ctx,
        );

        match outcome {
            Outcome::Reply(0) => None,
            Outcome::Reply(len) => {
                let sent = self.transport.send_datagram(
                    self.node_id,
                    &[requester],
                    &self.output[..len],
                    self.settings.send_retries,
                );
                if sent.is_err() {
                    boot_warn!("response to node {} abandoned", requester);
                }
                None
            }
            Outcome::StartApplication => Some(Exit::Application(self.config.clone())),
        }
    }
}

/// Whether the application region matches the CRC recorded in `config`.
///
/// A record with no application size has nothing to check against.
pub fn application_is_intact<S: Storage>(
    storage: &mut S,
    layout: &FlashLayout,
    config: &BootloaderConfig,
) -> bool {
    if config.application_size == 0 {
        return true;
    }
    if config.application_size > layout.application_capacity() {
        return false;
    }
    match crc32_region(storage, layout.application_addr, config.application_size) {
        Ok(crc) => crc == config.application_crc,
        Err(_) => false,
    }
}
