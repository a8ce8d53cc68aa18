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

use std::thread;
use std::time::Duration;
use xmodem::{memory_pair, receive, send, Config, MemoryStorage, Mode, NoopObserver};

fn quick_config() -> Config {
    Config::default().with_timeout(Duration::from_millis(500))
}

fn transfer(payload: Vec<u8>, config: Config) -> MemoryStorage {
    let (sender_end, receiver_end) = memory_pair();

    let sender = thread::spawn(move || {
        send(Box::new(sender_end), &payload, config, Box::new(NoopObserver))
    });

    let storage = MemoryStorage::new();
    receive(Box::new(receiver_end), Box::new(storage.clone()), config, Box::new(NoopObserver))
        .expect("receive should succeed");

    sender.join().expect("sender thread panicked").expect("send should succeed");
    storage
}

#[test]
fn test_end_to_end_crc() {
    let payload: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
    let storage = transfer(payload.clone(), quick_config());

    let chunks = storage.chunks().expect("storage should be written");
    assert_eq!(chunks.len(), 3);
    assert_eq!(storage.contents(), Some(payload));
}

#[test]
fn test_end_to_end_checksum() {
    let payload = b"Hello from the checksum side of the line.\n".repeat(10);
    let storage = transfer(payload.clone(), quick_config().with_mode(Mode::Checksum));

    assert_eq!(storage.contents(), Some(payload));
}

#[test]
fn test_end_to_end_exact_block_multiple() {
    let payload = vec![0x55u8; 256];
    let storage = transfer(payload.clone(), quick_config());

    assert_eq!(storage.contents(), Some(payload));
}

#[test]
fn test_end_to_end_large_block_size() {
    let config = Config { block_size: 1024, ..quick_config() };
    let payload: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();
    let storage = transfer(payload.clone(), config);

    assert_eq!(storage.contents(), Some(payload));
}

#[test]
fn test_end_to_end_sequence_wraps() {
    let config = Config { block_size: 8, ..quick_config() };
    let payload: Vec<u8> = (0..8 * 300).map(|i| (i % 0x19) as u8 + 0x20).collect();
    let storage = transfer(payload.clone(), config);

    assert_eq!(storage.chunks().map(|c| c.len()), Some(300));
    assert_eq!(storage.contents(), Some(payload));
}

#[test]
fn test_end_to_end_empty_file() {
    let storage = transfer(Vec::new(), quick_config());
    assert_eq!(storage.contents(), Some(Vec::new()));
}

#[test]
fn test_end_to_end_start_block_zero() {
    let config = Config { start_block: 0, ..quick_config() };
    let payload: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
    let storage = transfer(payload.clone(), config);

    assert_eq!(storage.chunks().map(|c| c.len()), Some(3));
    assert_eq!(storage.contents(), Some(payload));
}

#[test]
fn test_end_to_end_start_block_wraps() {
    let config = Config { start_block: 250, block_size: 8, ..quick_config() };
    let payload: Vec<u8> = (0..8 * 20).map(|i| (i % 0x19) as u8 + 0x20).collect();
    let storage = transfer(payload.clone(), config);

    assert_eq!(storage.chunks().map(|c| c.len()), Some(20));
    assert_eq!(storage.contents(), Some(payload));
}

#[test]
fn test_end_to_end_sender_starts_after_checksum_fallback() {
    let config = Config {
        crc_attempts: 1,
        ..Config::default().with_timeout(Duration::from_millis(100))
    };
    let payload: Vec<u8> = (0..300).map(|i| (i * 3 % 256) as u8).collect();
    let (sender_end, receiver_end) = memory_pair();

    let sent = payload.clone();
    let sender = thread::spawn(move || {
        // The 'C' and the first NAK are both queued by the time we look
        thread::sleep(Duration::from_millis(150));
        send(Box::new(sender_end), &sent, config, Box::new(NoopObserver))
    });

    let storage = MemoryStorage::new();
    receive(Box::new(receiver_end), Box::new(storage.clone()), config, Box::new(NoopObserver))
        .expect("receive should succeed");

    sender.join().expect("sender thread panicked").expect("send should succeed");
    assert_eq!(storage.contents(), Some(payload));
}
