// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command dispatch.
//!
//! The first payload byte selects a command by exact index match against an
//! immutable table; the rest of the payload is handed to that command.

use serde::Serialize;

use crate::config::BootloaderConfig;
use crate::storage::{FlashLayout, Storage};

/// What the control loop should do after a command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum Outcome {
    /// Send back the first `n` bytes of the output buffer; zero means no response.
    Reply(usize),
    /// Leave the bootloader for the resident application.
    StartApplication,
}

/// State a command may read or modify.
pub struct Context<'a, S> {
    pub config: &'a mut BootloaderConfig,
    pub storage: &'a mut S,
    pub layout: &'a FlashLayout,
}

/// One privileged operation.
///
/// Handlers run to completion, write their response into `out` and never
/// touch the bus themselves.
pub trait Handler<S> {
    fn execute(&self, args: &[u8], out: &mut [u8], ctx: &mut Context<'_, S>) -> Outcome;
}

pub struct CommandEntry<'a, S> {
    pub index: u8,
    pub handler: &'a dyn Handler<S>,
}

/// Run the command named by `payload[0]`.
///
/// An empty payload or an index missing from `table` yields `Reply(0)`.
pub fn execute<S: Storage>(
    payload: &[u8],
    table: &[CommandEntry<'_, S>],
    out: &mut [u8],
    ctx: &mut Context<'_, S>,
) -> Outcome {
    let Some((&index, args)) = payload.split_first() else {
        boot_debug!("empty command payload");
        return Outcome::Reply(0);
    };

    match table.iter().find(|entry| entry.index == index) {
        Some(entry) => entry.handler.execute(args, out, ctx),
        None => {
            boot_warn!("no such command {}", index);
            Outcome::Reply(0)
        }
    }
}

/// Serialize `response` into `out`.
pub fn reply<T: Serialize>(response: &T, out: &mut [u8]) -> Outcome {
    match postcard::to_slice(response, out) {
        Ok(used) => Outcome::Reply(used.len()),
        Err(_) => {
            boot_error!("response does not fit the output buffer");
            Outcome::Reply(0)
        }
    }
}
