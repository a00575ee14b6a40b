// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot argument, application validation, configuration handoff and jump.

use nodeboot_common::boot_fsm::{application_is_intact, BootArg};
use nodeboot_common::config::BootloaderConfig;
use nodeboot_common::protocol::{
    APPLICATION_ADDR, BOOT_ARG_NO_TIMEOUT_MAGIC, FLASH_BASE, FLASH_SIZE, RAM_BOOT_ARG_ADDR,
    RAM_CONFIG_HANDOFF_ADDR, RP2040_LAYOUT,
};

use crate::flash::RpFlash;

const SRAM_START: u32 = 0x2000_0000;
const SRAM_END: u32 = 0x2004_2000;

struct VectorTable {
    initial_sp: u32,
    reset_vector: u32,
}

impl VectorTable {
    unsafe fn read_from(addr: u32) -> Self {
        Self {
            initial_sp: (addr as *const u32).read_volatile(),
            reset_vector: (addr as *const u32).offset(1).read_volatile(),
        }
    }

    /// Stack in SRAM, reset handler inside the application region and in Thumb state.
    fn is_valid_for_application(&self) -> bool {
        let entry = self.reset_vector & !1;
        (SRAM_START..=SRAM_END).contains(&self.initial_sp)
            && self.reset_vector & 1 == 1
            && (APPLICATION_ADDR..FLASH_BASE + FLASH_SIZE).contains(&entry)
    }
}

/// Decide how the bootloader was entered.
///
/// The application requests a stay by writing the magic word before
/// resetting; GP2 held low does the same from the outside. The RAM word is
/// cleared so the next reset boots normally.
pub fn read_boot_arg(gp2_is_low: bool) -> BootArg {
    let ram_flag = unsafe { (RAM_BOOT_ARG_ADDR as *const u32).read_volatile() };
    unsafe {
        (RAM_BOOT_ARG_ADDR as *mut u32).write_volatile(0);
    }

    if gp2_is_low || ram_flag == BOOT_ARG_NO_TIMEOUT_MAGIC {
        BootArg::NoTimeout
    } else {
        BootArg::Normal
    }
}

/// Whether there is something worth jumping to.
pub fn application_is_bootable(flash: &mut RpFlash, config: &BootloaderConfig) -> bool {
    let vt = unsafe { VectorTable::read_from(APPLICATION_ADDR) };
    if !vt.is_valid_for_application() {
        defmt::println!(
            "No application at 0x{:08x} (sp=0x{:08x}, reset=0x{:08x})",
            APPLICATION_ADDR,
            vt.initial_sp,
            vt.reset_vector
        );
        return false;
    }

    if !application_is_intact(flash, &RP2040_LAYOUT, config) {
        defmt::println!(
            "Application CRC mismatch, expected 0x{:08x} over {} bytes",
            config.application_crc,
            config.application_size
        );
        return false;
    }

    true
}

/// Leave the bootloader for the application.
///
/// The persisted form of `config` is copied to RAM and its address passed in r0.
///
/// # Safety
/// [`application_is_bootable`] must have returned true for the current flash contents.
pub unsafe fn jump_to_application(config: &BootloaderConfig) -> ! {
    let handoff = match config.encode() {
        Ok(block) => {
            core::ptr::copy_nonoverlapping(
                block.as_ptr(),
                RAM_CONFIG_HANDOFF_ADDR as *mut u8,
                block.len(),
            );
            RAM_CONFIG_HANDOFF_ADDR
        }
        Err(_) => 0,
    };

    // Reset peripherals before jumping so the application can reinitialize cleanly
    prepare_for_handoff();

    relocate_vector_table(APPLICATION_ADDR);

    let vt = VectorTable::read_from(APPLICATION_ADDR);
    jump(vt.initial_sp, vt.reset_vector, handoff);
}

/// Mask and clear every NVIC interrupt. Clocks stay configured.
unsafe fn prepare_for_handoff() {
    cortex_m::interrupt::disable();

    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);

    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);
}

unsafe fn relocate_vector_table(base: u32) {
    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(base);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn jump(initial_sp: u32, reset_vector: u32, handoff: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i",
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        in("r0") handoff,
        options(noreturn)
    );
}
