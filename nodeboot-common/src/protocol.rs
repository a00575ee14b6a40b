// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared protocol types for bootloader <-> programming tool communication.
//!
//! This module provides types that work in both `no_std` (embedded) and `std` (host) environments.
//! Use the `std` feature for host tools.

use serde::{Deserialize, Serialize};

use crate::storage::FlashLayout;

// --- Bus constants ---

/// Identifier bit set only on the first frame of a datagram.
pub const START_OF_DATAGRAM_MASK: u8 = 1 << 7;
/// Identifier bits carrying the sender's node id.
pub const NODE_ID_MASK: u8 = 0x7F;
pub const MAX_NODE_ID: u8 = 0x7F;

/// Maximum payload of a single bus frame.
pub const FRAME_MAX_DATA: usize = 8;

/// Maximum number of destination ids a receiver keeps per datagram.
pub const MAX_DESTINATIONS: usize = 128;
/// Maximum datagram payload: one erase page of data plus argument overhead.
pub const MAX_PAYLOAD_SIZE: usize = FLASH_PAGE_SIZE as usize + 512;
/// Size of the scratch buffer handlers write their responses into.
pub const OUTPUT_BUF_SIZE: usize = MAX_PAYLOAD_SIZE;
/// Largest region a single read-flash command may return.
pub const MAX_READ_LENGTH: u32 = 1024;

// --- Timing defaults ---

pub const SEND_RETRIES: u32 = 100;
pub const POLL_TIMEOUT_MS: u32 = 1000;
pub const BOOT_TIMEOUT_MS: u32 = 5000;

// --- Flash layout constants ---

pub const FLASH_BASE: u32 = 0x1000_0000;
pub const FLASH_SIZE: u32 = 2 * 1024 * 1024;

pub const BOOTLOADER_ADDR: u32 = FLASH_BASE;
pub const BOOTLOADER_SIZE: u32 = 64 * 1024;

pub const CONFIG_PRIMARY_ADDR: u32 = 0x1001_0000;
pub const CONFIG_SECONDARY_ADDR: u32 = 0x1001_1000;

pub const APPLICATION_ADDR: u32 = 0x1002_0000;

/// Minimum erasable unit.
pub const FLASH_PAGE_SIZE: u32 = 4096;
/// Native programming granularity.
pub const FLASH_WRITE_SIZE: u32 = 256;

/// Size of the persisted configuration block at the start of each config region.
pub const CONFIG_RECORD_SIZE: usize = 256;

pub const RP2040_LAYOUT: FlashLayout = FlashLayout {
    flash_base: FLASH_BASE,
    flash_size: FLASH_SIZE,
    page_size: FLASH_PAGE_SIZE,
    write_size: FLASH_WRITE_SIZE,
    bootloader_addr: BOOTLOADER_ADDR,
    bootloader_size: BOOTLOADER_SIZE,
    config_primary: CONFIG_PRIMARY_ADDR,
    config_secondary: CONFIG_SECONDARY_ADDR,
    application_addr: APPLICATION_ADDR,
};

// --- RAM slots shared with the application ---

/// Boot argument word, written by the application before a reset.
pub const RAM_BOOT_ARG_ADDR: u32 = 0x2003_BFF0;
pub const BOOT_ARG_NO_TIMEOUT_MAGIC: u32 = 0x0B00_7A1E;

/// Configuration handed over to the application, address passed in r0.
pub const RAM_CONFIG_HANDOFF_ADDR: u32 = 0x2003_BE00;

// --- Command indices ---

pub const CMD_JUMP_TO_APPLICATION: u8 = 1;
pub const CMD_CRC_REGION: u8 = 2;
pub const CMD_ERASE_FLASH_PAGE: u8 = 3;
pub const CMD_WRITE_FLASH: u8 = 4;
pub const CMD_PING: u8 = 5;
pub const CMD_READ_FLASH: u8 = 6;
pub const CMD_CONFIG_UPDATE: u8 = 7;
pub const CMD_CONFIG_WRITE_TO_FLASH: u8 = 8;

// --- Command arguments ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionArgs {
    pub address: u32,
    pub length: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseArgs<'a> {
    pub address: u32,
    pub device_class: &'a str,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteArgs<'a> {
    pub address: u32,
    pub device_class: &'a str,
    pub data: &'a [u8],
}

/// Fields to change in the in-memory configuration. `None` leaves a field as is.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigUpdate<'a> {
    pub id: Option<u8>,
    #[serde(borrow)]
    pub board_name: Option<&'a str>,
    #[serde(borrow)]
    pub device_class: Option<&'a str>,
    pub application_crc: Option<u32>,
    pub application_size: Option<u32>,
}

// --- Responses ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    Ack(AckStatus),
    Crc(u32),
    Data(&'a [u8]),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum AckStatus {
    Ok,
    BadArguments,
    OutOfBounds,
    Unaligned,
    Protected,
    DeviceClassMismatch,
    TooLarge,
    FlashError,
}
