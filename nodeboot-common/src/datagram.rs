// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Datagram codec.
//!
//! A datagram is too large for one bus frame, so it travels as a byte stream
//! split over consecutive frames:
//!
//! ```text
//! dest_count: u8 | dest_ids: [u8; dest_count] | len: u16 BE | payload | crc32: u32 BE
//! ```
//!
//! The CRC-32 (ISO HDLC) covers every byte before it. The decoder is an
//! explicit state machine fed one byte at a time; the encoder hands out the
//! wire bytes in frame-sized chunks without buffering the whole datagram.

use crc::{Crc, CRC_32_ISO_HDLC};
use heapless::Vec;

use crate::protocol::{MAX_DESTINATIONS, MAX_PAYLOAD_SIZE};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const LENGTH_BYTES: u8 = 2;
const CRC_BYTES: u8 = 4;

/// Decoder sized for the bootloader's receive buffers.
pub type Decoder = DatagramDecoder<MAX_DESTINATIONS, MAX_PAYLOAD_SIZE>;

/// A datagram that cannot be encoded, or that a decoder gave up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[non_exhaustive]
pub enum DatagramError {
    NoDestinations,
    TooManyDestinations,
    PayloadTooLarge,
}

/// Position of the decoder inside the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum DecodeState {
    AwaitingDestinationCount,
    AwaitingDestinationList { remaining: u8 },
    AwaitingLength { remaining: u8 },
    AwaitingPayload { remaining: u16 },
    AwaitingChecksum { remaining: u8 },
    Complete,
    Invalid(DatagramError),
}

/// Reassembles one datagram from the payload bytes of successive frames.
///
/// `D` bounds the destination list, `P` bounds the payload. Nothing is ever
/// written past either bound: a sender declaring more marks the datagram
/// invalid and everything up to the next [`start`](Self::start) is dropped.
pub struct DatagramDecoder<const D: usize, const P: usize> {
    state: DecodeState,
    destinations: Vec<u8, D>,
    payload: Vec<u8, P>,
    declared_len: u16,
    received_crc: u32,
}

impl<const D: usize, const P: usize> Default for DatagramDecoder<D, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize, const P: usize> DatagramDecoder<D, P> {
    pub const fn new() -> Self {
        Self {
            state: DecodeState::AwaitingDestinationCount,
            destinations: Vec::new(),
            payload: Vec::new(),
            declared_len: 0,
            received_crc: 0,
        }
    }

    /// Discard any partial datagram and wait for a new one.
    pub fn start(&mut self) {
        self.state = DecodeState::AwaitingDestinationCount;
        self.destinations.clear();
        self.payload.clear();
        self.declared_len = 0;
        self.received_crc = 0;
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Consume one byte of frame payload.
    pub fn feed(&mut self, byte: u8) {
        self.state = match self.state {
            DecodeState::AwaitingDestinationCount => {
                if byte == 0 {
                    DecodeState::Invalid(DatagramError::NoDestinations)
                } else if byte as usize > D {
                    DecodeState::Invalid(DatagramError::TooManyDestinations)
                } else {
                    DecodeState::AwaitingDestinationList { remaining: byte }
                }
            }
            DecodeState::AwaitingDestinationList { remaining } => {
                if self.destinations.push(byte).is_err() {
                    DecodeState::Invalid(DatagramError::TooManyDestinations)
                } else if remaining == 1 {
                    DecodeState::AwaitingLength {
                        remaining: LENGTH_BYTES,
                    }
                } else {
                    DecodeState::AwaitingDestinationList {
                        remaining: remaining - 1,
                    }
                }
            }
            DecodeState::AwaitingLength { remaining } => {
                self.declared_len = (self.declared_len << 8) | byte as u16;
                if remaining > 1 {
                    DecodeState::AwaitingLength {
                        remaining: remaining - 1,
                    }
                } else if self.declared_len as usize > P {
                    boot_warn!("datagram declares {} payload bytes", self.declared_len);
                    DecodeState::Invalid(DatagramError::PayloadTooLarge)
                } else if self.declared_len == 0 {
                    DecodeState::AwaitingChecksum {
                        remaining: CRC_BYTES,
                    }
                } else {
                    DecodeState::AwaitingPayload {
                        remaining: self.declared_len,
                    }
                }
            }
            DecodeState::AwaitingPayload { remaining } => {
                if self.payload.push(byte).is_err() {
                    DecodeState::Invalid(DatagramError::PayloadTooLarge)
                } else if remaining == 1 {
                    DecodeState::AwaitingChecksum {
                        remaining: CRC_BYTES,
                    }
                } else {
                    DecodeState::AwaitingPayload {
                        remaining: remaining - 1,
                    }
                }
            }
            DecodeState::AwaitingChecksum { remaining } => {
                self.received_crc = (self.received_crc << 8) | byte as u32;
                if remaining == 1 {
                    DecodeState::Complete
                } else {
                    DecodeState::AwaitingChecksum {
                        remaining: remaining - 1,
                    }
                }
            }
            // Trailing bytes after completion and anything after an
            // invalid header are dropped until the next start marker.
            state @ (DecodeState::Complete | DecodeState::Invalid(_)) => state,
        };
    }

    pub fn feed_all(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.feed(byte);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == DecodeState::Complete
    }

    /// True when complete and the trailing CRC matches the received fields.
    pub fn is_valid(&self) -> bool {
        self.is_complete() && compute_crc(&self.destinations, &self.payload) == self.received_crc
    }

    pub fn destinations(&self) -> &[u8] {
        &self.destinations
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_addressed_to(&self, node_id: u8) -> bool {
        self.destinations.contains(&node_id)
    }
}

/// Integrity code over the header fields and payload of a datagram.
pub fn compute_crc(destinations: &[u8], payload: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&[destinations.len() as u8]);
    digest.update(destinations);
    digest.update(&(payload.len() as u16).to_be_bytes());
    digest.update(payload);
    digest.finalize()
}

/// Splits an outgoing datagram into frame-sized chunks.
pub struct DatagramEncoder<'a> {
    destinations: &'a [u8],
    payload: &'a [u8],
    crc: [u8; CRC_BYTES as usize],
    position: usize,
}

impl<'a> DatagramEncoder<'a> {
    pub fn new(destinations: &'a [u8], payload: &'a [u8]) -> Result<Self, DatagramError> {
        if destinations.is_empty() {
            return Err(DatagramError::NoDestinations);
        }
        if destinations.len() > u8::MAX as usize {
            return Err(DatagramError::TooManyDestinations);
        }
        if payload.len() > u16::MAX as usize {
            return Err(DatagramError::PayloadTooLarge);
        }

        Ok(Self {
            destinations,
            payload,
            crc: compute_crc(destinations, payload).to_be_bytes(),
            position: 0,
        })
    }

    /// Total number of bytes on the wire.
    pub fn encoded_len(&self) -> usize {
        1 + self.destinations.len() + LENGTH_BYTES as usize + self.payload.len() + CRC_BYTES as usize
    }

    /// Copy the next chunk of the encoding into `out`, at most `out.len()` bytes.
    ///
    /// Returns the number of bytes written; zero once the datagram is exhausted.
    pub fn next_chunk(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.encoded_len() - self.position);
        for (i, slot) in out[..count].iter_mut().enumerate() {
            *slot = self.byte_at(self.position + i);
        }
        self.position += count;
        count
    }

    pub fn is_exhausted(&self) -> bool {
        self.position == self.encoded_len()
    }

    fn byte_at(&self, index: usize) -> u8 {
        let dst_len = self.destinations.len();
        let len_bytes = (self.payload.len() as u16).to_be_bytes();

        let mut offset = index;
        if offset == 0 {
            return dst_len as u8;
        }
        offset -= 1;
        if offset < dst_len {
            return self.destinations[offset];
        }
        offset -= dst_len;
        if offset < len_bytes.len() {
            return len_bytes[offset];
        }
        offset -= len_bytes.len();
        if offset < self.payload.len() {
            return self.payload[offset];
        }
        offset -= self.payload.len();
        self.crc[offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(destinations: &[u8], payload: &[u8]) -> heapless::Vec<u8, 256> {
        let mut encoder = DatagramEncoder::new(destinations, payload).unwrap();
        let mut out = heapless::Vec::new();
        let mut chunk = [0u8; 8];
        loop {
            let n = encoder.next_chunk(&mut chunk);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]).unwrap();
        }
        out
    }

    #[test]
    fn test_encoding_field_order() {
        let bytes = encode(&[1, 2], &[0xAA]);
        let crc = compute_crc(&[1, 2], &[0xAA]).to_be_bytes();
        assert_eq!(&bytes[..6], &[2, 1, 2, 0x00, 0x01, 0xAA]);
        assert_eq!(&bytes[6..], &crc);
    }

    #[test]
    fn test_decoder_walks_every_state() {
        let bytes = encode(&[7], &[0x10, 0x20]);
        let mut dec: DatagramDecoder<4, 16> = DatagramDecoder::new();

        let expected = [
            DecodeState::AwaitingDestinationList { remaining: 1 },
            DecodeState::AwaitingLength { remaining: 2 },
            DecodeState::AwaitingLength { remaining: 1 },
            DecodeState::AwaitingPayload { remaining: 2 },
            DecodeState::AwaitingPayload { remaining: 1 },
            DecodeState::AwaitingChecksum { remaining: 4 },
            DecodeState::AwaitingChecksum { remaining: 3 },
            DecodeState::AwaitingChecksum { remaining: 2 },
            DecodeState::AwaitingChecksum { remaining: 1 },
            DecodeState::Complete,
        ];

        assert_eq!(dec.state(), DecodeState::AwaitingDestinationCount);
        for (byte, state) in bytes.iter().zip(expected.iter()) {
            dec.feed(*byte);
            assert_eq!(dec.state(), *state);
        }
        assert!(dec.is_valid());
    }

    #[test]
    fn test_zero_length_payload_skips_payload_state() {
        let bytes = encode(&[3], &[]);
        let mut dec: DatagramDecoder<4, 16> = DatagramDecoder::new();
        dec.feed_all(&bytes[..4]);
        assert_eq!(dec.state(), DecodeState::AwaitingChecksum { remaining: 4 });
        dec.feed_all(&bytes[4..]);
        assert!(dec.is_complete());
        assert!(dec.is_valid());
        assert!(dec.payload().is_empty());
    }

    #[test]
    fn test_zero_destination_count_is_invalid() {
        let mut dec: DatagramDecoder<4, 16> = DatagramDecoder::new();
        dec.feed(0);
        assert_eq!(
            dec.state(),
            DecodeState::Invalid(DatagramError::NoDestinations)
        );
        dec.feed_all(&[1, 2, 3, 4, 5, 6, 7]);
        assert!(!dec.is_complete());
        assert!(!dec.is_valid());
    }

    #[test]
    fn test_too_many_destinations_is_invalid() {
        let mut dec: DatagramDecoder<2, 16> = DatagramDecoder::new();
        dec.feed(3);
        assert_eq!(
            dec.state(),
            DecodeState::Invalid(DatagramError::TooManyDestinations)
        );
    }

    #[test]
    fn test_bytes_after_completion_are_ignored() {
        let bytes = encode(&[1], &[5]);
        let mut dec: DatagramDecoder<4, 16> = DatagramDecoder::new();
        dec.feed_all(&bytes);
        dec.feed_all(&[0xDE, 0xAD]);
        assert!(dec.is_valid());
        assert_eq!(dec.payload(), &[5]);
    }

    #[test]
    fn test_corrupted_byte_fails_validation() {
        let mut bytes = encode(&[1], &[5, 6, 7]);
        bytes[5] ^= 0xFF;
        let mut dec: DatagramDecoder<4, 16> = DatagramDecoder::new();
        dec.feed_all(&bytes);
        assert!(dec.is_complete());
        assert!(!dec.is_valid());
    }

    #[test]
    fn test_start_clears_previous_datagram() {
        let mut dec: DatagramDecoder<4, 16> = DatagramDecoder::new();
        dec.feed_all(&encode(&[1, 2], &[9, 9, 9]));
        dec.start();
        assert_eq!(dec.state(), DecodeState::AwaitingDestinationCount);
        assert!(dec.destinations().is_empty());
        assert!(dec.payload().is_empty());
    }

    #[test]
    fn test_encoder_rejects_empty_destinations() {
        assert_eq!(
            DatagramEncoder::new(&[], &[1]).err(),
            Some(DatagramError::NoDestinations)
        );
    }

    #[test]
    fn test_encoder_chunks_never_exceed_buffer() {
        let payload = [0x55u8; 20];
        let mut encoder = DatagramEncoder::new(&[1, 2, 3], &payload).unwrap();
        let total = encoder.encoded_len();
        let mut chunk = [0u8; 8];
        let mut seen = 0;
        while !encoder.is_exhausted() {
            let n = encoder.next_chunk(&mut chunk);
            assert!(n > 0 && n <= 8);
            seen += n;
        }
        assert_eq!(seen, total);
        assert_eq!(encoder.next_chunk(&mut chunk), 0);
    }
}
