// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bootloader commands.
//!
//! Each command decodes its postcard arguments, checks them against the
//! flash layout and answers with a postcard [`Response`]. Bad requests are
//! answered with an [`AckStatus`], never by failing the control loop.

use serde::Deserialize;

use crate::config::persist_config;
use crate::dispatch::{reply, CommandEntry, Context, Handler, Outcome};
use crate::protocol::*;
use crate::storage::{crc32_region, Storage};

/// The default command set, indexed as in [`crate::protocol`].
pub fn command_table<S: Storage + 'static>() -> [CommandEntry<'static, S>; 8] {
    [
        CommandEntry {
            index: CMD_JUMP_TO_APPLICATION,
            handler: &JumpToApplication,
        },
        CommandEntry {
            index: CMD_CRC_REGION,
            handler: &CrcRegion,
        },
        CommandEntry {
            index: CMD_ERASE_FLASH_PAGE,
            handler: &EraseFlashPage,
        },
        CommandEntry {
            index: CMD_WRITE_FLASH,
            handler: &WriteFlash,
        },
        CommandEntry {
            index: CMD_PING,
            handler: &Ping,
        },
        CommandEntry {
            index: CMD_READ_FLASH,
            handler: &ReadFlash,
        },
        CommandEntry {
            index: CMD_CONFIG_UPDATE,
            handler: &ConfigUpdateCommand,
        },
        CommandEntry {
            index: CMD_CONFIG_WRITE_TO_FLASH,
            handler: &ConfigWriteToFlash,
        },
    ]
}

fn parse<'a, T: Deserialize<'a>>(args: &'a [u8]) -> Option<T> {
    postcard::from_bytes(args).ok()
}

fn ack(status: AckStatus, out: &mut [u8]) -> Outcome {
    reply(&Response::Ack(status), out)
}

/// Checks shared by erase and write: right board, inside flash, not protected.
fn check_target<S>(
    ctx: &Context<'_, S>,
    device_class: &str,
    address: u32,
    length: u32,
) -> Result<(), AckStatus> {
    if ctx.config.device_class.as_str() != device_class {
        boot_warn!("device class mismatch");
        return Err(AckStatus::DeviceClassMismatch);
    }
    if !ctx.layout.contains(address, length) {
        return Err(AckStatus::OutOfBounds);
    }
    if ctx.layout.is_protected(address, length) {
        boot_warn!("refusing to modify protected range at 0x{:08x}", address);
        return Err(AckStatus::Protected);
    }
    Ok(())
}

/// Leave the bootloader. Produces no response.
pub struct JumpToApplication;

impl<S: Storage> Handler<S> for JumpToApplication {
    fn execute(&self, _args: &[u8], _out: &mut [u8], _ctx: &mut Context<'_, S>) -> Outcome {
        boot_info!("jump to application requested");
        Outcome::StartApplication
    }
}

/// Liveness check.
pub struct Ping;

impl<S: Storage> Handler<S> for Ping {
    fn execute(&self, _args: &[u8], out: &mut [u8], _ctx: &mut Context<'_, S>) -> Outcome {
        ack(AckStatus::Ok, out)
    }
}

/// CRC-32 of a flash region.
pub struct CrcRegion;

impl<S: Storage> Handler<S> for CrcRegion {
    fn execute(&self, args: &[u8], out: &mut [u8], ctx: &mut Context<'_, S>) -> Outcome {
        let Some(RegionArgs { address, length }) = parse(args) else {
            return ack(AckStatus::BadArguments, out);
        };
        if !ctx.layout.contains(address, length) {
            return ack(AckStatus::OutOfBounds, out);
        }
        match crc32_region(ctx.storage, address, length) {
            Ok(crc) => reply(&Response::Crc(crc), out),
            Err(_) => ack(AckStatus::FlashError, out),
        }
    }
}

/// Erase one page.
pub struct EraseFlashPage;

impl<S: Storage> Handler<S> for EraseFlashPage {
    fn execute(&self, args: &[u8], out: &mut [u8], ctx: &mut Context<'_, S>) -> Outcome {
        let Some(EraseArgs {
            address,
            device_class,
        }) = parse(args)
        else {
            return ack(AckStatus::BadArguments, out);
        };
        if let Err(status) = check_target(ctx, device_class, address, ctx.layout.page_size) {
            return ack(status, out);
        }
        if !ctx.layout.is_page_aligned(address) {
            return ack(AckStatus::Unaligned, out);
        }

        boot_debug!("erase page 0x{:08x}", address);
        match ctx.storage.erase_page(address) {
            Ok(()) => ack(AckStatus::Ok, out),
            Err(_) => ack(AckStatus::FlashError, out),
        }
    }
}

/// Program data at a write-aligned address.
pub struct WriteFlash;

impl<S: Storage> Handler<S> for WriteFlash {
    fn execute(&self, args: &[u8], out: &mut [u8], ctx: &mut Context<'_, S>) -> Outcome {
        let Some(WriteArgs {
            address,
            device_class,
            data,
        }) = parse(args)
        else {
            return ack(AckStatus::BadArguments, out);
        };
        let length = data.len() as u32;
        if let Err(status) = check_target(ctx, device_class, address, length) {
            return ack(status, out);
        }
        if !ctx.layout.is_write_aligned(address) || !ctx.layout.is_write_aligned(length) {
            return ack(AckStatus::Unaligned, out);
        }

        boot_debug!("write {} bytes at 0x{:08x}", length, address);
        match ctx.storage.write(address, data) {
            Ok(()) => ack(AckStatus::Ok, out),
            Err(_) => ack(AckStatus::FlashError, out),
        }
    }
}

/// Copy a flash region out.
pub struct ReadFlash;

impl<S: Storage> Handler<S> for ReadFlash {
    fn execute(&self, args: &[u8], out: &mut [u8], ctx: &mut Context<'_, S>) -> Outcome {
        let Some(RegionArgs { address, length }) = parse(args) else {
            return ack(AckStatus::BadArguments, out);
        };
        if length > MAX_READ_LENGTH {
            return ack(AckStatus::TooLarge, out);
        }
        if !ctx.layout.contains(address, length) {
            return ack(AckStatus::OutOfBounds, out);
        }

        let mut buf = [0u8; MAX_READ_LENGTH as usize];
        let data = &mut buf[..length as usize];
        match ctx.storage.read(address, data) {
            Ok(()) => reply(&Response::Data(data), out),
            Err(_) => ack(AckStatus::FlashError, out),
        }
    }
}

/// Change fields of the in-memory configuration.
pub struct ConfigUpdateCommand;

impl<S: Storage> Handler<S> for ConfigUpdateCommand {
    fn execute(&self, args: &[u8], out: &mut [u8], ctx: &mut Context<'_, S>) -> Outcome {
        let Some(update) = parse::<ConfigUpdate<'_>>(args) else {
            return ack(AckStatus::BadArguments, out);
        };
        match ctx.config.apply(&update) {
            Ok(()) => ack(AckStatus::Ok, out),
            Err(_) => ack(AckStatus::BadArguments, out),
        }
    }
}

/// Persist the in-memory configuration to both config regions.
pub struct ConfigWriteToFlash;

impl<S: Storage> Handler<S> for ConfigWriteToFlash {
    fn execute(&self, _args: &[u8], out: &mut [u8], ctx: &mut Context<'_, S>) -> Outcome {
        let mut next = ctx.config.clone();
        next.update_count = next.update_count.wrapping_add(1);

        match persist_config(ctx.storage, ctx.layout, &next) {
            Ok(()) => {
                boot_info!("config saved, update count {}", next.update_count);
                *ctx.config = next;
                ack(AckStatus::Ok, out)
            }
            Err(_) => ack(AckStatus::FlashError, out),
        }
    }
}
