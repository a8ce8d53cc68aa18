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

//! Per-transfer settings

use std::io;
use std::time::Duration;
use crate::protocol::{Mode, DEFAULT_BLOCK_SIZE};

/// Settings for one transfer. Built by the caller and moved into the state
/// machine; negotiation records its result in the state machine, never here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Retry interval: probe spacing and the silence that counts as a timeout
    pub timeout: Duration,
    /// Consecutive silent intervals the sender tolerates
    pub max_timeouts: u32,
    /// Consecutive bad blocks (receiver) or NAKs (sender) tolerated per block
    pub max_errors: u32,
    /// 'C' probes sent before falling back to checksum mode
    pub crc_attempts: u32,
    /// Mode the receiver asks for first
    pub mode: Mode,
    pub block_size: usize,
    /// Wire sequence number of the first block
    pub start_block: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timeout: Duration::from_secs(10),
            max_timeouts: 5,
            max_errors: 10,
            crc_attempts: 3,
            mode: Mode::Crc,
            block_size: DEFAULT_BLOCK_SIZE,
            start_block: 1,
        }
    }
}

impl Config {
    /// NAK probes sent in checksum mode before the receiver gives up
    pub fn nak_attempts(&self) -> u32 {
        self.max_errors.saturating_mul(3)
    }

    /// Rejects settings no transfer can run with. A zero block size would
    /// frame every chunk as an empty payload.
    pub fn validate(&self) -> io::Result<()> {
        if self.block_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block size must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
