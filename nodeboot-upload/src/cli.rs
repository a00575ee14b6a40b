// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use nodeboot_common::protocol::{APPLICATION_ADDR, MAX_NODE_ID};

use crate::client::Client;
use crate::commands;
use crate::transport::SerialBus;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "nodeboot-upload")]
#[command(about = "Programming tool for nodeboot bootloaders on a shared bus")]
pub struct Cli {
    /// Serial port of the bus adapter (e.g., /dev/ttyUSB0)
    #[arg(short, long)]
    pub port: String,

    /// Bus line rate
    #[arg(short, long, default_value = "115200")]
    pub baud: u32,

    /// Node id this tool uses as sender
    #[arg(long, default_value = "127", value_parser = parse_node_id)]
    pub host_id: u8,

    /// How long to wait for every addressed node to answer
    #[arg(long, default_value = "1000")]
    pub timeout_ms: u32,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Check which nodes are listening
    Ping {
        #[arg(short, long, value_delimiter = ',', required = true, value_parser = parse_node_id)]
        nodes: Vec<u8>,
    },

    /// Program an image into one or more nodes
    Flash {
        /// Raw binary image
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long, value_delimiter = ',', required = true, value_parser = parse_node_id)]
        nodes: Vec<u8>,

        /// Must match the device class configured on every node
        #[arg(short, long)]
        device_class: String,

        /// Load address
        #[arg(short, long, default_value_t = APPLICATION_ADDR, value_parser = parse_u32)]
        address: u32,
    },

    /// Print the CRC-32 of a flash region on each node
    Crc {
        #[arg(short, long, value_delimiter = ',', required = true, value_parser = parse_node_id)]
        nodes: Vec<u8>,

        #[arg(short, long, value_parser = parse_u32)]
        address: u32,

        #[arg(short, long, value_parser = parse_u32)]
        length: u32,
    },

    /// Read a flash region from one node
    Read {
        #[arg(short, long, value_parser = parse_node_id)]
        node: u8,

        #[arg(short, long, value_parser = parse_u32)]
        address: u32,

        #[arg(short, long, value_parser = parse_u32)]
        length: u32,

        /// Write the bytes to a file instead of dumping them as hex
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Change and persist node configuration
    Config {
        #[arg(short, long, value_delimiter = ',', required = true, value_parser = parse_node_id)]
        nodes: Vec<u8>,

        /// New node id (only valid with a single node)
        #[arg(long, value_parser = parse_node_id)]
        id: Option<u8>,

        #[arg(long)]
        board_name: Option<String>,

        #[arg(long)]
        device_class: Option<String>,
    },

    /// Start the application on the given nodes
    Jump {
        #[arg(short, long, value_delimiter = ',', required = true, value_parser = parse_node_id)]
        nodes: Vec<u8>,
    },
}

/// Accept decimal or `0x`-prefixed hexadecimal.
fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_node_id(s: &str) -> Result<u8, String> {
    let id = parse_u32(s)?;
    if id > MAX_NODE_ID as u32 {
        return Err(format!("node id {} does not fit in 7 bits", id));
    }
    Ok(id as u8)
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let mut bus = SerialBus::new(&cli.port, cli.baud)?;
    bus.clear_input()?;
    let mut client = Client::new(bus, cli.host_id, cli.timeout_ms);

    match cli.command {
        Commands::Ping { nodes } => commands::ping(&mut client, &nodes),
        Commands::Flash {
            file,
            nodes,
            device_class,
            address,
        } => commands::flash(&mut client, &nodes, &file, &device_class, address),
        Commands::Crc {
            nodes,
            address,
            length,
        } => commands::crc(&mut client, &nodes, address, length),
        Commands::Read {
            node,
            address,
            length,
            output,
        } => commands::read(&mut client, node, address, length, output.as_deref()),
        Commands::Config {
            nodes,
            id,
            board_name,
            device_class,
        } => commands::config(
            &mut client,
            &nodes,
            id,
            board_name.as_deref(),
            device_class.as_deref(),
        ),
        Commands::Jump { nodes } => commands::jump(&mut client, &nodes),
    }
}
