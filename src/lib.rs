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

//! XMODEM file transfer (checksum and CRC-16 variants) over serial lines,
//! TCP streams or any other [`Transport`].

pub mod checksum;
pub mod config;
pub mod frame;
pub mod observer;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod storage;
pub mod timer;
pub mod transport;

pub use config::Config;
pub use observer::{LogObserver, NoopObserver, ProgressObserver, Status};
pub use protocol::Mode;
pub use receiver::{receive, ReceiverError};
pub use sender::{send, SenderError};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use transport::{memory_pair, MemoryTransport, SerialTransport, TcpTransport, Transport, TransportKind};
