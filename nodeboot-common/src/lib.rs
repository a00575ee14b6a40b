// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Core of the nodeboot bus bootloader.
//!
//! Datagram reassembly, frame transport, command dispatch and the bootloader
//! control loop, written against small hardware traits so they run the same
//! on the RP2040 and on the host.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: Enables `std` support for host tools
//! - `defmt-logging` feature: Emits log messages through `defmt`

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod macros;

pub mod boot_fsm;
pub mod clock;
pub mod commands;
pub mod config;
pub mod datagram;
pub mod dispatch;
pub mod frame;
pub mod protocol;
pub mod storage;
pub mod transport;

// Re-export commonly used types
pub use boot_fsm::{BootArg, Bootloader, Exit, Settings};
pub use clock::{Clock, Deadline};
pub use config::{BootloaderConfig, ConfigError};
pub use datagram::{DatagramDecoder, DatagramEncoder, Decoder};
pub use dispatch::{CommandEntry, Context, Handler, Outcome};
pub use frame::{Frame, FrameAssembler};
pub use protocol::{AckStatus, Response};
pub use storage::{FlashLayout, Storage};
pub use transport::{Bus, FrameTransport, IdleWait, LineState, TransportError};
