// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! RP2040 on-board flash as a [`Storage`] backend.
//!
//! Reads go straight through the XIP window. Page erase and program are done
//! by the boot ROM, which has to take the QSPI interface away from XIP for
//! the duration of the call. Nothing may be fetched from flash meanwhile, so
//! the routine driving the ROM lives in RAM, runs with interrupts masked,
//! and only calls through entry points resolved beforehand by [`init`].

use nodeboot_common::protocol::{FLASH_BASE, FLASH_PAGE_SIZE, FLASH_SIZE, FLASH_WRITE_SIZE};
use nodeboot_common::storage::Storage;

/// 64 KiB block erase command, used by the ROM when a range allows it.
const BLOCK_ERASE_CMD: u8 = 0xD8;
const BLOCK_ERASE_SIZE: u32 = 1 << 16;

type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);
type RomTableLookup = unsafe extern "C" fn(*const u16, u32) -> usize;

/// Boot ROM entry points used to rewrite flash.
#[derive(Clone, Copy)]
struct RomFlash {
    connect_internal_flash: RomFnVoid,
    exit_xip: RomFnVoid,
    range_erase: RomFnErase,
    range_program: RomFnProgram,
    flush_cache: RomFnVoid,
    enter_cmd_xip: RomFnVoid,
}

unsafe extern "C" fn unresolved_void() {}
unsafe extern "C" fn unresolved_erase(_: u32, _: usize, _: u32, _: u8) {}
unsafe extern "C" fn unresolved_program(_: u32, _: *const u8, _: usize) {}

// Held in RAM so the detached routine can reach it with XIP off.
static mut ROM: RomFlash = RomFlash {
    connect_internal_flash: unresolved_void,
    exit_xip: unresolved_void,
    range_erase: unresolved_erase,
    range_program: unresolved_program,
    flush_cache: unresolved_void,
    enter_cmd_xip: unresolved_void,
};

/// Resolve a two-letter ROM function code.
///
/// 0x14 holds a halfword pointer to the function table, 0x18 one to the
/// lookup routine.
unsafe fn rom_lookup(code: &[u8; 2]) -> usize {
    let table = *(0x14 as *const u16) as *const u16;
    let lookup = core::mem::transmute::<usize, RomTableLookup>(*(0x18 as *const u16) as usize);
    lookup(table, u16::from_le_bytes(*code) as u32)
}

/// Resolve the ROM entry points. Call once, before any erase or write.
pub fn init() {
    unsafe {
        ROM = RomFlash {
            connect_internal_flash: core::mem::transmute::<usize, RomFnVoid>(rom_lookup(b"IF")),
            exit_xip: core::mem::transmute::<usize, RomFnVoid>(rom_lookup(b"EX")),
            range_erase: core::mem::transmute::<usize, RomFnErase>(rom_lookup(b"RE")),
            range_program: core::mem::transmute::<usize, RomFnProgram>(rom_lookup(b"RP")),
            flush_cache: core::mem::transmute::<usize, RomFnVoid>(rom_lookup(b"FC")),
            enter_cmd_xip: core::mem::transmute::<usize, RomFnVoid>(rom_lookup(b"CX")),
        };
    }
}

/// A flash rewrite at a flash-relative offset.
enum FlashOp {
    Erase { offset: u32, len: u32 },
    Program { offset: u32, data: *const u8, len: usize },
}

/// Run `op` with XIP detached, then restore XIP and flush its cache.
///
/// # Safety
/// [`init`] must have run, and a `Program` source must not lie in flash.
#[link_section = ".data"]
#[inline(never)]
unsafe fn run_detached(op: FlashOp) {
    let rom = *core::ptr::addr_of!(ROM);
    cortex_m::interrupt::disable();
    (rom.connect_internal_flash)();
    (rom.exit_xip)();
    match op {
        FlashOp::Erase { offset, len } => {
            (rom.range_erase)(offset, len as usize, BLOCK_ERASE_SIZE, BLOCK_ERASE_CMD)
        }
        FlashOp::Program { offset, data, len } => (rom.range_program)(offset, data, len),
    }
    (rom.flush_cache)();
    (rom.enter_cmd_xip)();
    cortex_m::interrupt::enable();
}

fn read_xip(address: u32, buf: &mut [u8]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = unsafe { ((address + i as u32) as *const u8).read_volatile() };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum FlashError {
    OutOfRange,
    Unaligned,
}

/// The on-board QSPI flash, addressed through its XIP window.
///
/// Only valid after [`init`].
pub struct RpFlash;

impl RpFlash {
    fn check(address: u32, len: usize, align: u32) -> Result<u32, FlashError> {
        let end = address
            .checked_add(len as u32)
            .ok_or(FlashError::OutOfRange)?;
        if address < FLASH_BASE || end > FLASH_BASE + FLASH_SIZE {
            return Err(FlashError::OutOfRange);
        }
        let offset = address - FLASH_BASE;
        if offset % align != 0 || len as u32 % align != 0 {
            return Err(FlashError::Unaligned);
        }
        Ok(offset)
    }
}

impl Storage for RpFlash {
    type Error = FlashError;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        Self::check(address, buf.len(), 1)?;
        read_xip(address, buf);
        Ok(())
    }

    fn erase_page(&mut self, address: u32) -> Result<(), Self::Error> {
        let offset = Self::check(address, FLASH_PAGE_SIZE as usize, FLASH_PAGE_SIZE)?;
        unsafe {
            run_detached(FlashOp::Erase {
                offset,
                len: FLASH_PAGE_SIZE,
            })
        };
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        let offset = Self::check(address, data.len(), FLASH_WRITE_SIZE)?;
        unsafe {
            run_detached(FlashOp::Program {
                offset,
                data: data.as_ptr(),
                len: data.len(),
            })
        };
        Ok(())
    }
}
