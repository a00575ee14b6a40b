// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Nodeboot: RP2040 bootloader programmable over a shared RS-485 bus.

#![no_std]
#![no_main]

mod boot;
mod flash;
mod peripherals;
mod uart_bus;

use defmt_rtt as _;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use nodeboot_common::boot_fsm::{Bootloader, Exit, Settings};
use nodeboot_common::commands::command_table;
use panic_probe as _;

use crate::flash::RpFlash;
use crate::uart_bus::{TimerClock, UartBus};

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

fn blink(led: &mut impl OutputPin, timer: &mut impl DelayNs, count: u32, period_ms: u32) {
    for _ in 0..count {
        led.set_high().ok();
        timer.delay_ms(period_ms);
        led.set_low().ok();
        timer.delay_ms(period_ms);
    }
}

#[entry]
fn main() -> ! {
    defmt::println!("Bootloader init");

    let mut p = peripherals::init();

    blink(&mut p.led_pin, &mut p.timer, 3, 200);
    flash::init();

    let gp2_low = p.gp2.is_low().unwrap_or(false);
    let arg = boot::read_boot_arg(gp2_low);
    defmt::println!("Boot argument: {}", arg);

    let table = command_table::<RpFlash>();
    let bus = UartBus::new(p.uart, p.de_pin, p.timer);
    let clock = TimerClock::new(p.timer);

    let mut bootloader =
        match Bootloader::boot(bus, RpFlash, clock, &table, Settings::default(), arg) {
            Ok(bootloader) => bootloader,
            Err(e) => {
                defmt::println!("No usable configuration ({}), halting", e);
                loop {
                    cortex_m::asm::wfi();
                }
            }
        };

    defmt::println!("Node {} listening", bootloader.node_id());
    p.led_pin.set_high().ok();

    loop {
        let Exit::Application(config) = bootloader.run();

        if boot::application_is_bootable(bootloader.storage_mut(), &config) {
            defmt::println!("Jumping to application...");
            p.led_pin.set_low().ok();
            p.timer.delay_ms(10u32);
            unsafe { boot::jump_to_application(&config) }
        }

        // Nothing to start: stay reachable until a valid image is programmed
        defmt::println!("Staying in bootloader");
        bootloader.disarm_timeout();
    }
}
