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

//! Block trailers: additive checksum and CRC-16/XMODEM

use crc::{Crc, CRC_16_XMODEM};
use crate::protocol::Mode;

pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// 8-bit sum of all bytes, modulo 256
pub fn sum8(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16/XMODEM (poly 0x1021, init 0, no reflection)
pub fn crc16(payload: &[u8]) -> u16 {
    CRC16.checksum(payload)
}

/// Trailer bytes for `payload` in the given mode; the CRC is big-endian.
pub fn checksum(payload: &[u8], mode: Mode) -> Vec<u8> {
    match mode {
        Mode::Checksum => vec![sum8(payload)],
        Mode::Crc => crc16(payload).to_be_bytes().to_vec(),
    }
}
