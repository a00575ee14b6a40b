// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Programming tool for nodeboot bootloaders on a shared RS-485 bus.
//!
//! Usage:
//!   nodeboot-upload --port /dev/ttyUSB0 ping --nodes 1,2,3
//!   nodeboot-upload --port /dev/ttyUSB0 flash app.bin --nodes 1,2 --device-class motor-v2
//!   nodeboot-upload --port /dev/ttyUSB0 config --nodes 4 --id 5 --board-name left-wheel
//!   nodeboot-upload --port /dev/ttyUSB0 jump --nodes 1,2

mod cli;
mod client;
mod commands;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args)
}
