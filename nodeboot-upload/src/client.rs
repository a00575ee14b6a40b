// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Request/response exchange with a set of nodes.
//!
//! Nodes answer on the shared bus in whatever order they get to it, so the
//! frames of several responses interleave. Each sender id gets its own
//! datagram decoder.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;

use anyhow::{anyhow, bail, Result};
use nodeboot_common::clock::Deadline;
use nodeboot_common::datagram::Decoder;
use nodeboot_common::frame::Frame;
use nodeboot_common::protocol::{AckStatus, Response};
use nodeboot_common::transport::{Bus, FrameTransport};
use serde::Serialize;

use crate::transport::HostClock;

/// Attempts per frame beyond the first before a request is abandoned.
pub const SEND_RETRIES: u32 = 10;

/// Receive slice while waiting for responses.
const POLL_MS: u32 = 20;

pub struct Client<B> {
    transport: FrameTransport<B>,
    clock: HostClock,
    host_id: u8,
    timeout_ms: u32,
    decoders: HashMap<u8, Box<Decoder>>,
}

impl<B> Client<B>
where
    B: Bus,
    B::Error: Debug,
{
    pub fn new(bus: B, host_id: u8, timeout_ms: u32) -> Self {
        Self {
            transport: FrameTransport::new(bus),
            clock: HostClock::new(),
            host_id,
            timeout_ms,
            decoders: HashMap::new(),
        }
    }

    pub fn bus(&self) -> &B {
        self.transport.bus()
    }

    /// Send `payload` to `nodes` without waiting for anything.
    pub fn send(&mut self, nodes: &[u8], payload: &[u8]) -> Result<()> {
        self.transport
            .send_datagram(self.host_id, nodes, payload, SEND_RETRIES)
            .map_err(|e| anyhow!("Failed to send datagram: {:?}", e))?;
        Ok(())
    }

    /// Send `payload` to `nodes` and collect one response from each.
    ///
    /// Fails if any node stays silent past the timeout.
    pub fn request(&mut self, nodes: &[u8], payload: &[u8]) -> Result<BTreeMap<u8, Vec<u8>>> {
        let mut nodes = nodes.to_vec();
        nodes.sort_unstable();
        nodes.dedup();

        self.decoders.clear();
        self.send(&nodes, payload)?;

        let deadline = Deadline::after(&self.clock, self.timeout_ms);
        let mut replies = BTreeMap::new();

        while replies.len() < nodes.len() && !deadline.has_elapsed(&self.clock) {
            let Some(frame) = self.transport.receive(POLL_MS) else {
                continue;
            };
            let source = frame.source();
            if let Some(reply) = self.accept(&frame) {
                if nodes.contains(&source) {
                    replies.entry(source).or_insert(reply);
                }
            }
        }

        let missing: Vec<u8> = nodes
            .iter()
            .filter(|n| !replies.contains_key(*n))
            .copied()
            .collect();
        if !missing.is_empty() {
            bail!("No response from node(s) {:?}", missing);
        }

        Ok(replies)
    }

    /// Request and require `Ack(Ok)` from every node.
    pub fn request_ack(&mut self, nodes: &[u8], payload: &[u8], what: &str) -> Result<()> {
        for (node, reply) in self.request(nodes, payload)? {
            match parse_response(&reply)? {
                Response::Ack(AckStatus::Ok) => {}
                Response::Ack(status) => bail!("{} failed on node {}: {:?}", what, node, status),
                other => bail!("Unexpected response from node {}: {:?}", node, other),
            }
        }
        Ok(())
    }

    /// Feed a frame to its sender's decoder; yields a completed datagram
    /// addressed to this tool.
    fn accept(&mut self, frame: &Frame) -> Option<Vec<u8>> {
        let decoder = self
            .decoders
            .entry(frame.source())
            .or_insert_with(|| Box::new(Decoder::new()));

        if frame.is_start_of_datagram() {
            decoder.start();
        }
        decoder.feed_all(&frame.data);
        if !decoder.is_complete() {
            return None;
        }

        let reply = (decoder.is_valid() && decoder.is_addressed_to(self.host_id))
            .then(|| decoder.payload().to_vec());
        decoder.start();
        reply
    }
}

/// Command payload: index byte followed by postcard arguments.
pub fn command<T: Serialize>(index: u8, args: &T) -> Result<Vec<u8>> {
    let mut payload = vec![index];
    payload.extend(
        postcard::to_allocvec(args).map_err(|e| anyhow!("Failed to serialize arguments: {}", e))?,
    );
    Ok(payload)
}

pub fn parse_response(payload: &[u8]) -> Result<Response<'_>> {
    postcard::from_bytes(payload).map_err(|e| {
        anyhow!(
            "Failed to deserialize response: {} (raw {} bytes: {:02x?})",
            e,
            payload.len(),
            &payload[..payload.len().min(32)]
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeboot_common::datagram::DatagramEncoder;
    use std::collections::VecDeque;

    const HOST: u8 = 100;

    #[derive(Default)]
    struct ScriptedBus {
        incoming: VecDeque<Frame>,
        sent: Vec<Frame>,
    }

    impl Bus for ScriptedBus {
        type Error = ();

        fn try_send(&mut self, frame: &Frame) -> Result<(), ()> {
            self.sent.push(frame.clone());
            Ok(())
        }

        fn receive(&mut self, _timeout_ms: u32) -> Result<Option<Frame>, ()> {
            Ok(self.incoming.pop_front())
        }
    }

    fn frames(source: u8, destinations: &[u8], payload: &[u8]) -> Vec<Frame> {
        let mut encoder = DatagramEncoder::new(destinations, payload).unwrap();
        let mut chunk = [0u8; 8];
        let mut out = Vec::new();
        loop {
            let n = encoder.next_chunk(&mut chunk);
            if n == 0 {
                break;
            }
            out.push(Frame::new(source, out.is_empty(), &chunk[..n]).unwrap());
        }
        out
    }

    fn ack_ok() -> Vec<u8> {
        postcard::to_allocvec(&Response::Ack(AckStatus::Ok)).unwrap()
    }

    #[test]
    fn test_interleaved_responses_are_separated_by_sender() {
        let a = frames(1, &[HOST], &[0xAA; 20]);
        let b = frames(2, &[HOST], &[0xBB; 20]);
        let mut bus = ScriptedBus::default();
        for (fa, fb) in a.into_iter().zip(b) {
            bus.incoming.push_back(fa);
            bus.incoming.push_back(fb);
        }

        let mut client = Client::new(bus, HOST, 200);
        let replies = client.request(&[2, 1], &[5]).unwrap();

        assert_eq!(replies[&1], vec![0xAA; 20]);
        assert_eq!(replies[&2], vec![0xBB; 20]);
    }

    #[test]
    fn test_request_is_sent_from_host_id() {
        let mut bus = ScriptedBus::default();
        bus.incoming.extend(frames(4, &[HOST], &ack_ok()));

        let mut client = Client::new(bus, HOST, 200);
        client.request_ack(&[4], &[5], "ping").unwrap();

        let sent = &client.bus().sent;
        assert!(sent[0].is_start_of_datagram());
        assert!(sent.iter().all(|f| f.source() == HOST));
    }

    #[test]
    fn test_responses_for_someone_else_are_ignored() {
        let mut bus = ScriptedBus::default();
        bus.incoming.extend(frames(4, &[HOST + 1], &ack_ok()));

        let mut client = Client::new(bus, HOST, 50);
        let err = client.request(&[4], &[5]).unwrap_err();
        assert!(err.to_string().contains("[4]"));
    }

    #[test]
    fn test_error_ack_is_reported() {
        let nack = postcard::to_allocvec(&Response::Ack(AckStatus::Protected)).unwrap();
        let mut bus = ScriptedBus::default();
        bus.incoming.extend(frames(4, &[HOST], &nack));

        let mut client = Client::new(bus, HOST, 200);
        let err = client.request_ack(&[4], &[3], "erase").unwrap_err();
        assert!(err.to_string().contains("Protected"));
    }
}
