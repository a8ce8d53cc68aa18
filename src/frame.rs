// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Encoding and decoding of a single XMODEM block
//!
//! ```text
//! SOH | blk | 0xFF - blk | payload (block size bytes) | sum8 or CRC-16 (big-endian)
//! ```

use thiserror::Error;
use crate::checksum::checksum;
use crate::protocol::{Mode, HEADER_LEN, SOH};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
    #[error("sequence number 0x{seq:02X} does not match complement 0x{complement:02X}")]
    Complement { seq: u8, complement: u8 },
    #[error("trailer mismatch")]
    Trailer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Does not start with SOH; the caller ignores it
    #[error("not a data block")]
    NotData,
    /// Damaged in transit; the caller answers NAK
    #[error("corrupt block: {0}")]
    Corrupt(Corruption),
    /// Wrong sequence number; the caller drops it without answering
    #[error("block 0x{got:02X} out of sequence (expected 0x{expected:02X})")]
    OutOfSync { expected: u8, got: u8 },
    /// Payload length differs from the block size; the caller answers NAK
    #[error("payload of {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

impl FrameError {
    /// Whether the receiver should request a retransmission
    pub fn wants_nak(&self) -> bool {
        matches!(self, FrameError::Corrupt(_) | FrameError::SizeMismatch { .. })
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Sequence byte carried on the wire for a block number
pub fn seq_byte(block_num: u32) -> u8 {
    (block_num % 256) as u8
}

/// Full on-wire length of a block
pub fn frame_len(block_size: usize, mode: Mode) -> usize {
    HEADER_LEN + block_size + mode.trailer_len()
}

pub fn encode_block(block_num: u32, payload: &[u8], mode: Mode) -> Vec<u8> {
    let seq = seq_byte(block_num);
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + mode.trailer_len());
    frame.push(SOH);
    frame.push(seq);
    frame.push(0xFF - seq);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&checksum(payload, mode));
    frame
}

/// Validates `frame` as block `expected` and returns its payload.
pub fn decode_block(frame: &[u8], expected: u32, block_size: usize, mode: Mode) -> Result<&[u8], FrameError> {
    if frame.first() != Some(&SOH) {
        return Err(FrameError::NotData);
    }

    let trailer_len = mode.trailer_len();
    if frame.len() < HEADER_LEN {
        return Err(FrameError::SizeMismatch { expected: block_size, actual: 0 });
    }

    let seq = frame[1];
    let complement = frame[2];
    if seq.wrapping_add(complement) != 0xFF {
        return Err(FrameError::Corrupt(Corruption::Complement { seq, complement }));
    }

    let expected = seq_byte(expected);
    if seq != expected {
        return Err(FrameError::OutOfSync { expected, got: seq });
    }

    let actual = frame.len().saturating_sub(HEADER_LEN + trailer_len);
    if actual != block_size {
        return Err(FrameError::SizeMismatch { expected: block_size, actual });
    }

    let (payload, trailer) = frame[HEADER_LEN..].split_at(block_size);
    if checksum(payload, mode) != trailer {
        return Err(FrameError::Corrupt(Corruption::Trailer));
    }

    Ok(payload)
}
