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

//! XMODEM protocol constants

use std::fmt;

/// Start of header - begins a 128-byte data block
pub const SOH: u8 = 0x01;

/// End of transmission - sender has no more blocks
pub const EOT: u8 = 0x04;

/// Acknowledge - block (or EOT) accepted
pub const ACK: u8 = 0x06;

/// Negative acknowledge - retransmit, or request checksum mode when idle
pub const NAK: u8 = 0x15;

/// Cancel - recognized but never acted on
pub const CAN: u8 = 0x18;

/// 'C' - receiver requests CRC mode
pub const CRC_REQUEST: u8 = b'C';

/// CP/M end-of-file byte used to pad the last block
pub const FILLER: u8 = 0x1A;

/// Payload size of a standard XMODEM block
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// SOH, sequence number and its complement
pub const HEADER_LEN: usize = 3;

// ============================================================================
// Transfer Mode
// ============================================================================

/// Trailer flavour negotiated at the start of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 1-byte additive checksum, requested with NAK
    Checksum,
    /// 2-byte CRC-16/XMODEM, requested with 'C'
    Crc,
}

impl Mode {
    pub fn trailer_len(self) -> usize {
        match self {
            Mode::Checksum => 1,
            Mode::Crc => 2,
        }
    }

    /// Byte a receiver sends to ask for this mode
    pub fn request_byte(self) -> u8 {
        match self {
            Mode::Checksum => NAK,
            Mode::Crc => CRC_REQUEST,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Checksum => write!(f, "checksum"),
            Mode::Crc => write!(f, "crc"),
        }
    }
}

// ============================================================================
// Control Signals
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    CrcRequest,
    Nak,
    Ack,
    Soh,
    Eot,
    Can,
}

impl Signal {
    pub fn from_byte(byte: u8) -> Option<Signal> {
        match byte {
            CRC_REQUEST => Some(Signal::CrcRequest),
            NAK => Some(Signal::Nak),
            ACK => Some(Signal::Ack),
            SOH => Some(Signal::Soh),
            EOT => Some(Signal::Eot),
            CAN => Some(Signal::Can),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Signal::CrcRequest => CRC_REQUEST,
            Signal::Nak => NAK,
            Signal::Ack => ACK,
            Signal::Soh => SOH,
            Signal::Eot => EOT,
            Signal::Can => CAN,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::CrcRequest => "C",
            Signal::Nak => "NAK",
            Signal::Ack => "ACK",
            Signal::Soh => "SOH",
            Signal::Eot => "EOT",
            Signal::Can => "CAN",
        };
        f.write_str(name)
    }
}

/// Human readable name of a raw byte for debug output
pub fn byte_name(byte: u8) -> String {
    match Signal::from_byte(byte) {
        Some(signal) => signal.to_string(),
        None => format!("0x{:02X}", byte),
    }
}
