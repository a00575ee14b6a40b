// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for bootloader operations.

use std::fmt::Debug;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use crc::{Crc, CRC_32_ISO_HDLC};
use indicatif::{ProgressBar, ProgressStyle};

use nodeboot_common::protocol::{
    ConfigUpdate, EraseArgs, RegionArgs, Response, WriteArgs, APPLICATION_ADDR,
    CMD_CONFIG_UPDATE, CMD_CONFIG_WRITE_TO_FLASH, CMD_CRC_REGION, CMD_ERASE_FLASH_PAGE,
    CMD_JUMP_TO_APPLICATION, CMD_PING, CMD_READ_FLASH, CMD_WRITE_FLASH, FLASH_PAGE_SIZE,
    FLASH_WRITE_SIZE, MAX_READ_LENGTH,
};
use nodeboot_common::transport::Bus;

use crate::client::{command, parse_response, Client};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Bytes per write-flash command; a multiple of the write granularity.
const WRITE_CHUNK_SIZE: usize = 1024;

/// Check which nodes answer a ping.
pub fn ping<B: Bus>(client: &mut Client<B>, nodes: &[u8]) -> Result<()>
where
    B::Error: Debug,
{
    client.request_ack(nodes, &[CMD_PING], "Ping")?;
    for node in nodes {
        println!("Node {}: OK", node);
    }
    Ok(())
}

/// Pad an image with erased-flash bytes up to the write granularity.
fn pad_image(mut image: Vec<u8>) -> Vec<u8> {
    let write_size = FLASH_WRITE_SIZE as usize;
    let padded = image.len().div_ceil(write_size) * write_size;
    image.resize(padded, 0xFF);
    image
}

/// Program `file` at `address` on every node in `nodes`.
pub fn flash<B: Bus>(
    client: &mut Client<B>,
    nodes: &[u8],
    file: &Path,
    device_class: &str,
    address: u32,
) -> Result<()>
where
    B::Error: Debug,
{
    let firmware = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if firmware.is_empty() {
        bail!("{} is empty", file.display());
    }
    if address % FLASH_PAGE_SIZE != 0 {
        bail!("Load address 0x{:08x} is not page aligned", address);
    }
    let size = firmware.len() as u32;
    let crc32 = CRC32.checksum(&firmware);

    println!(
        "Firmware: {} ({} bytes, CRC32: 0x{:08x})",
        file.display(),
        size,
        crc32
    );
    println!("Target:   node(s) {:?} at 0x{:08x}", nodes, address);
    println!("Class:    {}", device_class);
    println!();

    let image = pad_image(firmware);

    let pb = ProgressBar::new(image.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    for (page_index, page) in image.chunks(FLASH_PAGE_SIZE as usize).enumerate() {
        let page_addr = address + page_index as u32 * FLASH_PAGE_SIZE;

        let erase = command(
            CMD_ERASE_FLASH_PAGE,
            &EraseArgs {
                address: page_addr,
                device_class,
            },
        )?;
        if let Err(e) = client.request_ack(nodes, &erase, "Erase") {
            pb.abandon();
            return Err(e.context(format!("at 0x{:08x}", page_addr)));
        }

        for (chunk_index, chunk) in page.chunks(WRITE_CHUNK_SIZE).enumerate() {
            let chunk_addr = page_addr + (chunk_index * WRITE_CHUNK_SIZE) as u32;
            let write = command(
                CMD_WRITE_FLASH,
                &WriteArgs {
                    address: chunk_addr,
                    device_class,
                    data: chunk,
                },
            )?;
            if let Err(e) = client.request_ack(nodes, &write, "Write") {
                pb.abandon();
                return Err(e.context(format!("at 0x{:08x}", chunk_addr)));
            }
            pb.inc(chunk.len() as u64);
        }
    }

    pb.finish_with_message("Upload complete");
    println!();

    print!("Verifying... ");
    std::io::stdout().flush()?;
    let crcs = region_crcs(client, nodes, address, size)?;
    let bad: Vec<u8> = crcs
        .iter()
        .filter(|(_, crc)| *crc != crc32)
        .map(|(node, _)| *node)
        .collect();
    if !bad.is_empty() {
        bail!("CRC verification failed on node(s) {:?}", bad);
    }
    println!("OK");

    if address == APPLICATION_ADDR {
        print!("Recording application CRC... ");
        std::io::stdout().flush()?;
        let update = ConfigUpdate {
            application_crc: Some(crc32),
            application_size: Some(size),
            ..Default::default()
        };
        client.request_ack(nodes, &command(CMD_CONFIG_UPDATE, &update)?, "Config update")?;
        client.request_ack(nodes, &[CMD_CONFIG_WRITE_TO_FLASH], "Config save")?;
        println!("OK");
    }

    println!();
    println!("Firmware uploaded successfully!");
    println!("Use 'nodeboot-upload jump --nodes ..' to start the application.");

    Ok(())
}

fn region_crcs<B: Bus>(
    client: &mut Client<B>,
    nodes: &[u8],
    address: u32,
    length: u32,
) -> Result<Vec<(u8, u32)>>
where
    B::Error: Debug,
{
    let payload = command(CMD_CRC_REGION, &RegionArgs { address, length })?;
    let mut crcs = Vec::new();
    for (node, reply) in client.request(nodes, &payload)? {
        match parse_response(&reply)? {
            Response::Crc(crc) => crcs.push((node, crc)),
            Response::Ack(status) => bail!("CRC failed on node {}: {:?}", node, status),
            other => bail!("Unexpected response from node {}: {:?}", node, other),
        }
    }
    Ok(crcs)
}

/// Print the CRC-32 of a region on each node.
pub fn crc<B: Bus>(client: &mut Client<B>, nodes: &[u8], address: u32, length: u32) -> Result<()>
where
    B::Error: Debug,
{
    for (node, crc) in region_crcs(client, nodes, address, length)? {
        println!("Node {}: 0x{:08x}", node, crc);
    }
    Ok(())
}

/// Read a region from one node, in `MAX_READ_LENGTH` pieces.
pub fn read<B: Bus>(
    client: &mut Client<B>,
    node: u8,
    address: u32,
    length: u32,
    output: Option<&Path>,
) -> Result<()>
where
    B::Error: Debug,
{
    let mut data = Vec::with_capacity(length as usize);
    let mut offset = 0;

    while offset < length {
        let piece = (length - offset).min(MAX_READ_LENGTH);
        let payload = command(
            CMD_READ_FLASH,
            &RegionArgs {
                address: address + offset,
                length: piece,
            },
        )?;
        let replies = client.request(&[node], &payload)?;
        let Some(reply) = replies.get(&node) else {
            bail!("No response from node {}", node);
        };
        match parse_response(reply)? {
            Response::Data(bytes) if bytes.len() == piece as usize => data.extend_from_slice(bytes),
            Response::Data(bytes) => bail!("Short read: {} of {} bytes", bytes.len(), piece),
            Response::Ack(status) => bail!("Read failed at 0x{:08x}: {:?}", address + offset, status),
            other => bail!("Unexpected response: {:?}", other),
        }
        offset += piece;
    }

    match output {
        Some(path) => {
            fs::write(path, &data).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} bytes to {}", data.len(), path.display());
        }
        None => {
            for (i, line) in data.chunks(16).enumerate() {
                println!("{:08x}: {:02x?}", address + (i * 16) as u32, line);
            }
        }
    }

    Ok(())
}

/// Update configuration fields and persist them.
pub fn config<B: Bus>(
    client: &mut Client<B>,
    nodes: &[u8],
    id: Option<u8>,
    board_name: Option<&str>,
    device_class: Option<&str>,
) -> Result<()>
where
    B::Error: Debug,
{
    if id.is_some() && nodes.len() != 1 {
        bail!("--id can only be set on one node at a time");
    }

    let update = ConfigUpdate {
        id,
        board_name,
        device_class,
        ..Default::default()
    };
    client.request_ack(nodes, &command(CMD_CONFIG_UPDATE, &update)?, "Config update")?;
    client.request_ack(nodes, &[CMD_CONFIG_WRITE_TO_FLASH], "Config save")?;

    println!("Configuration saved on node(s) {:?}.", nodes);
    if id.is_some() {
        println!("The new id takes effect after the next reset.");
    }
    Ok(())
}

/// Start the application. Nodes do not answer this one.
pub fn jump<B: Bus>(client: &mut Client<B>, nodes: &[u8]) -> Result<()>
where
    B::Error: Debug,
{
    client.send(nodes, &[CMD_JUMP_TO_APPLICATION])?;
    println!("Jump sent to node(s) {:?}.", nodes);
    Ok(())
}
