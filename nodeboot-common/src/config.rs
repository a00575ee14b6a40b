// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bootloader configuration record and its two redundant flash copies.
//!
//! Persisted block at the start of a config region (`CONFIG_RECORD_SIZE` bytes):
//!
//! ```text
//! crc32: u32 LE | len: u16 LE | postcard(BootloaderConfig) | 0xFF padding
//! ```
//!
//! The CRC covers `len` and the postcard body.

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::protocol::{ConfigUpdate, CONFIG_RECORD_SIZE, MAX_NODE_ID};
use crate::storage::{crc32, FlashLayout, Storage};

const HEADER_SIZE: usize = 6;
const BODY_CAPACITY: usize = CONFIG_RECORD_SIZE - HEADER_SIZE;

pub const NAME_CAPACITY: usize = 64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct BootloaderConfig {
    /// This node's identity on the bus.
    pub id: u8,
    pub board_name: String<NAME_CAPACITY>,
    /// Firmware images are only accepted for a matching device class.
    pub device_class: String<NAME_CAPACITY>,
    pub application_crc: u32,
    pub application_size: u32,
    pub update_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[non_exhaustive]
pub enum ConfigError {
    /// Neither region holds a valid record.
    NoValidConfig,
    BadLength,
    CrcMismatch,
    Decode,
    Encode,
    InvalidId,
    NameTooLong,
    Storage,
}

/// Which redundant copy a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum ConfigSlot {
    Primary,
    Secondary,
}

impl BootloaderConfig {
    pub fn new(id: u8, board_name: &str, device_class: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply(&ConfigUpdate {
            id: Some(id),
            board_name: Some(board_name),
            device_class: Some(device_class),
            ..Default::default()
        })?;
        Ok(config)
    }

    /// Apply a partial update. On error the record is left untouched.
    pub fn apply(&mut self, update: &ConfigUpdate<'_>) -> Result<(), ConfigError> {
        let mut next = self.clone();

        if let Some(id) = update.id {
            if id > MAX_NODE_ID {
                return Err(ConfigError::InvalidId);
            }
            next.id = id;
        }
        if let Some(name) = update.board_name {
            next.board_name = String::try_from(name).map_err(|_| ConfigError::NameTooLong)?;
        }
        if let Some(class) = update.device_class {
            next.device_class = String::try_from(class).map_err(|_| ConfigError::NameTooLong)?;
        }
        if let Some(crc) = update.application_crc {
            next.application_crc = crc;
        }
        if let Some(size) = update.application_size {
            next.application_size = size;
        }

        *self = next;
        Ok(())
    }

    /// Serialize into a persisted block.
    pub fn encode(&self) -> Result<[u8; CONFIG_RECORD_SIZE], ConfigError> {
        let mut block = [0xFFu8; CONFIG_RECORD_SIZE];
        let len = postcard::to_slice(self, &mut block[HEADER_SIZE..])
            .map_err(|_| ConfigError::Encode)?
            .len();

        block[4..6].copy_from_slice(&(len as u16).to_le_bytes());
        let crc = crc32(&block[4..HEADER_SIZE + len]);
        block[..4].copy_from_slice(&crc.to_le_bytes());
        Ok(block)
    }

    /// Parse and check a persisted block.
    pub fn decode(block: &[u8]) -> Result<Self, ConfigError> {
        if block.len() < HEADER_SIZE {
            return Err(ConfigError::BadLength);
        }
        let stored_crc = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        let len = u16::from_le_bytes([block[4], block[5]]) as usize;
        if len > BODY_CAPACITY || HEADER_SIZE + len > block.len() {
            return Err(ConfigError::BadLength);
        }
        if crc32(&block[4..HEADER_SIZE + len]) != stored_crc {
            return Err(ConfigError::CrcMismatch);
        }
        let config: Self = postcard::from_bytes(&block[HEADER_SIZE..HEADER_SIZE + len])
            .map_err(|_| ConfigError::Decode)?;
        if config.id > MAX_NODE_ID {
            return Err(ConfigError::InvalidId);
        }
        Ok(config)
    }
}

/// Read and validate the record stored at `address`.
pub fn read_config<S: Storage>(storage: &mut S, address: u32) -> Result<BootloaderConfig, ConfigError> {
    let mut block = [0u8; CONFIG_RECORD_SIZE];
    storage
        .read(address, &mut block)
        .map_err(|_| ConfigError::Storage)?;
    BootloaderConfig::decode(&block)
}

/// Load the primary copy if it validates, else the secondary.
pub fn load_config<S: Storage>(
    storage: &mut S,
    layout: &FlashLayout,
) -> Result<(BootloaderConfig, ConfigSlot), ConfigError> {
    match read_config(storage, layout.config_primary) {
        Ok(config) => return Ok((config, ConfigSlot::Primary)),
        Err(e) => boot_warn!("primary config rejected ({}), trying secondary", e),
    }
    if let Ok(config) = read_config(storage, layout.config_secondary) {
        return Ok((config, ConfigSlot::Secondary));
    }
    boot_error!("no valid config in either region");
    Err(ConfigError::NoValidConfig)
}

/// Erase the region at `address` and program the record into it.
pub fn write_config<S: Storage>(
    storage: &mut S,
    address: u32,
    config: &BootloaderConfig,
) -> Result<(), ConfigError> {
    let block = config.encode()?;
    storage.erase_page(address).map_err(|_| ConfigError::Storage)?;
    storage.write(address, &block).map_err(|_| ConfigError::Storage)?;
    Ok(())
}

/// Persist to the primary region, then the secondary one.
///
/// Each copy is rewritten only after the previous one verified, so an
/// interruption leaves at least one valid record.
pub fn persist_config<S: Storage>(
    storage: &mut S,
    layout: &FlashLayout,
    config: &BootloaderConfig,
) -> Result<(), ConfigError> {
    for address in [layout.config_primary, layout.config_secondary] {
        write_config(storage, address, config)?;
        if read_config(storage, address)? != *config {
            return Err(ConfigError::Storage);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_block() {
        let config = BootloaderConfig::new(12, "motor-board", "motor-v2").unwrap();
        let block = config.encode().unwrap();
        assert_eq!(BootloaderConfig::decode(&block).unwrap(), config);
    }

    #[test]
    fn test_erased_block_is_rejected() {
        let block = [0xFFu8; CONFIG_RECORD_SIZE];
        assert_eq!(BootloaderConfig::decode(&block), Err(ConfigError::BadLength));
    }

    #[test]
    fn test_flipped_bit_is_rejected() {
        let config = BootloaderConfig::new(3, "a", "b").unwrap();
        let mut block = config.encode().unwrap();
        block[HEADER_SIZE] ^= 0x01;
        assert_eq!(BootloaderConfig::decode(&block), Err(ConfigError::CrcMismatch));
    }

    #[test]
    fn test_record_with_eight_bit_id_is_rejected() {
        let config = BootloaderConfig {
            id: 200,
            ..BootloaderConfig::new(3, "a", "b").unwrap()
        };
        let block = config.encode().unwrap();
        assert_eq!(BootloaderConfig::decode(&block), Err(ConfigError::InvalidId));
    }

    #[test]
    fn test_apply_rejects_id_outside_seven_bits() {
        let mut config = BootloaderConfig::new(3, "a", "b").unwrap();
        let update = ConfigUpdate {
            id: Some(128),
            board_name: Some("renamed"),
            ..Default::default()
        };
        assert_eq!(config.apply(&update), Err(ConfigError::InvalidId));
        assert_eq!(config.board_name.as_str(), "a");
    }

    #[test]
    fn test_apply_rejects_long_names() {
        let mut config = BootloaderConfig::default();
        let long = [b'x'; NAME_CAPACITY + 1];
        let long = core::str::from_utf8(&long).unwrap();
        let update = ConfigUpdate {
            device_class: Some(long),
            ..Default::default()
        };
        assert_eq!(config.apply(&update), Err(ConfigError::NameTooLong));
    }
}
