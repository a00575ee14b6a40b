// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Non-volatile storage abstraction and flash layout checks.
//!
//! The bootloader binary implements [`Storage`] over the RP2040 ROM flash
//! routines; tests implement it over a plain byte array.

use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Page erase / program / read primitives.
///
/// Addresses are absolute (the same values the layout uses).
pub trait Storage {
    type Error;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Erase the page starting at `address`.
    fn erase_page(&mut self, address: u32) -> Result<(), Self::Error>;

    /// Program `data` at `address`. Both are multiples of the write granularity.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error>;
}

/// Where things live in flash, and the storage geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout {
    pub flash_base: u32,
    pub flash_size: u32,
    /// Minimum erasable unit.
    pub page_size: u32,
    /// Native programming granularity.
    pub write_size: u32,
    pub bootloader_addr: u32,
    pub bootloader_size: u32,
    pub config_primary: u32,
    pub config_secondary: u32,
    pub application_addr: u32,
}

impl FlashLayout {
    pub fn flash_end(&self) -> u32 {
        self.flash_base + self.flash_size
    }

    /// `[address, address + length)` lies inside flash.
    pub fn contains(&self, address: u32, length: u32) -> bool {
        let Some(end) = address.checked_add(length) else {
            return false;
        };
        address >= self.flash_base && end <= self.flash_end()
    }

    /// The range touches the running bootloader or one of the config pages.
    pub fn is_protected(&self, address: u32, length: u32) -> bool {
        let end = address.saturating_add(length.max(1));
        let overlaps = |start: u32, size: u32| address < start + size && start < end;

        overlaps(self.bootloader_addr, self.bootloader_size)
            || overlaps(self.config_primary, self.page_size)
            || overlaps(self.config_secondary, self.page_size)
    }

    pub fn is_page_aligned(&self, address: u32) -> bool {
        address.wrapping_sub(self.flash_base) % self.page_size == 0
    }

    pub fn is_write_aligned(&self, value: u32) -> bool {
        value % self.write_size == 0
    }

    /// Bytes from the application start to the end of flash.
    pub fn application_capacity(&self) -> u32 {
        self.flash_end() - self.application_addr
    }
}

/// CRC-32 (ISO HDLC) over a storage region, read in small chunks.
pub fn crc32_region<S: Storage>(storage: &mut S, address: u32, size: u32) -> Result<u32, S::Error> {
    let mut digest = CRC32.digest();
    let mut remaining = size as usize;
    let mut addr = address;
    let mut chunk = [0u8; 256];

    while remaining > 0 {
        let n = remaining.min(chunk.len());
        storage.read(addr, &mut chunk[..n])?;
        digest.update(&chunk[..n]);
        addr += n as u32;
        remaining -= n;
    }

    Ok(digest.finalize())
}

/// Checksum of an in-memory image, matching [`crc32_region`].
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RP2040_LAYOUT;

    #[test]
    fn test_contains_rejects_overflowing_range() {
        assert!(!RP2040_LAYOUT.contains(u32::MAX - 4, 16));
        assert!(!RP2040_LAYOUT.contains(0x0FFF_FFFF, 1));
        assert!(RP2040_LAYOUT.contains(RP2040_LAYOUT.application_addr, 256));
        assert!(!RP2040_LAYOUT.contains(RP2040_LAYOUT.flash_end() - 4, 8));
    }

    #[test]
    fn test_bootloader_and_config_are_protected() {
        let l = RP2040_LAYOUT;
        assert!(l.is_protected(l.bootloader_addr, 4));
        assert!(l.is_protected(l.bootloader_addr + l.bootloader_size - 1, 1));
        assert!(l.is_protected(l.config_primary, l.page_size));
        assert!(l.is_protected(l.config_secondary + 16, 16));
        assert!(!l.is_protected(l.application_addr, l.page_size));
    }

    #[test]
    fn test_range_ending_past_config_page_is_protected() {
        let l = RP2040_LAYOUT;
        assert!(l.is_protected(l.config_secondary + l.page_size - 256, 512));
    }

    #[test]
    fn test_alignment_helpers() {
        let l = RP2040_LAYOUT;
        assert!(l.is_page_aligned(l.application_addr));
        assert!(!l.is_page_aligned(l.application_addr + 256));
        assert!(l.is_write_aligned(512));
        assert!(!l.is_write_aligned(100));
    }
}
