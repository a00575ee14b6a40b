// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bus frames: a one-byte identifier plus up to eight payload bytes.
//!
//! The identifier carries the sender's 7-bit node id. Its top bit is the
//! start-of-datagram marker, set only on the first frame of a datagram.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::protocol::{FRAME_MAX_DATA, MAX_NODE_ID, NODE_ID_MASK, START_OF_DATAGRAM_MASK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[non_exhaustive]
pub enum FrameError {
    /// More than [`FRAME_MAX_DATA`] payload bytes.
    TooLong,
    /// Node id does not fit in seven bits.
    InvalidNodeId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u8,
    pub data: Vec<u8, FRAME_MAX_DATA>,
}

impl Frame {
    /// Build a frame sent by `source`, optionally flagged as the start of a datagram.
    pub fn new(source: u8, start_of_datagram: bool, data: &[u8]) -> Result<Self, FrameError> {
        if source > MAX_NODE_ID {
            return Err(FrameError::InvalidNodeId);
        }
        let data = Vec::from_slice(data).map_err(|_| FrameError::TooLong)?;
        let id = if start_of_datagram {
            source | START_OF_DATAGRAM_MASK
        } else {
            source
        };
        Ok(Self { id, data })
    }

    pub fn is_start_of_datagram(&self) -> bool {
        self.id & START_OF_DATAGRAM_MASK != 0
    }

    /// Sender id with the start marker masked off.
    pub fn source(&self) -> u8 {
        self.id & NODE_ID_MASK
    }
}

/// Upper bound of one COBS-encoded frame on a byte link, delimiter included.
pub const ENCODED_FRAME_CAPACITY: usize = 16;

/// Rebuilds frames from a COBS-delimited byte stream.
///
/// Bytes collect until a 0x00 delimiter, then the run is decoded. A run that
/// overflows the buffer or fails to decode is dropped whole.
pub struct FrameAssembler<const N: usize = ENCODED_FRAME_CAPACITY> {
    buf: [u8; N],
    len: usize,
    overflowed: bool,
}

impl<const N: usize> Default for FrameAssembler<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameAssembler<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0u8; N],
            len: 0,
            overflowed: false,
        }
    }

    /// Forget the bytes collected since the last delimiter.
    pub fn reset(&mut self) {
        self.len = 0;
        self.overflowed = false;
    }

    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        if byte != 0 {
            if self.len < N {
                self.buf[self.len] = byte;
                self.len += 1;
            } else {
                self.overflowed = true;
            }
            return None;
        }

        let len = self.len;
        let overflowed = self.overflowed;
        self.reset();
        if len == 0 || overflowed {
            return None;
        }
        match postcard::from_bytes_cobs::<Frame>(&mut self.buf[..len]) {
            Ok(frame) => Some(frame),
            Err(_) => {
                boot_debug!("dropping malformed frame");
                None
            }
        }
    }
}
