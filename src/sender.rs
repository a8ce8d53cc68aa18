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

use std::marker::PhantomData;
use std::io;
use log::{debug, info, warn};
use thiserror::Error;
use crate::config::Config;
use crate::frame::encode_block;
use crate::observer::{ProgressObserver, Status};
use crate::protocol::*;
use crate::transport::Transport;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("retries exhausted: {0}")]
    ExhaustedRetries(String),
}

// ============================================================================
// States
// ============================================================================

pub struct AwaitingStart;
pub struct Sending;
pub struct AwaitingEotAck;
pub struct Done;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    transport: Box<dyn Transport>,
    observer: Box<dyn ProgressObserver>,
    config: Config,
    mode: Mode,
    // Index 0 is a placeholder so indices line up with block numbers
    blocks: Vec<Vec<u8>>,
    // Next block to send
    cursor: usize,
    naks: u32,
    timeouts: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    /// Waits for one inbound byte (or a timeout) and reacts to it.
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError>;

    fn is_done(&self) -> bool {
        false
    }
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            transport: self.transport,
            observer: self.observer,
            config: self.config,
            mode: self.mode,
            blocks: self.blocks,
            cursor: self.cursor,
            naks: self.naks,
            timeouts: self.timeouts,
        })
    }

    fn state_name() -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    fn io_error(&self, e: io::Error) -> SenderError {
        SenderError::Io(io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, Self::state_name())
        ))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SenderError> {
        self.transport.write_all(bytes).map_err(|e| self.io_error(e))
    }

    /// `None` when nothing arrived within the retry interval
    fn read_byte(&mut self) -> Result<Option<u8>, SenderError> {
        let mut buf = [0u8; 1];
        match self.transport.read_timeout(&mut buf, self.config.timeout) {
            Ok(0) => Ok(None),
            Ok(_) => {
                self.timeouts = 0;
                debug!("Received: {}", byte_name(buf[0]));
                Ok(Some(buf[0]))
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn block_number(&self, index: usize) -> u32 {
        self.config.start_block + index as u32 - 1
    }

    fn send_block(&mut self, index: usize) -> Result<(), SenderError> {
        let block_num = self.block_number(index);
        let frame = encode_block(block_num, &self.blocks[index], self.mode);
        self.write(&frame)?;
        debug!("Sent: block {} ({} bytes, {} mode)", block_num, frame.len(), self.mode);
        self.observer.on_status(&Status::send(Signal::Soh, Some(block_num)));
        Ok(())
    }

    fn send_eot(&mut self) -> Result<(), SenderError> {
        self.write(&[EOT])?;
        debug!("Sent: EOT");
        self.observer.on_status(&Status::send(Signal::Eot, None));
        Ok(())
    }

    fn fail(mut self, reason: String) -> SenderError {
        warn!("Giving up: {}", reason);
        if let Err(e) = self.transport.close() {
            warn!("Failed to release transport: {}", e);
        }
        SenderError::ExhaustedRetries(reason)
    }

    fn on_silence(mut self) -> Result<Box<dyn SenderState>, SenderError>
    where
        SenderFsm<S>: SenderState,
        S: 'static,
    {
        self.timeouts += 1;
        debug!("Timeout {} of {} in state {}", self.timeouts, self.config.max_timeouts, Self::state_name());
        if self.timeouts > self.config.max_timeouts {
            let reason = format!("no response from receiver after {} timeouts", self.timeouts);
            return Err(self.fail(reason));
        }
        Ok(Box::new(self) as Box<dyn SenderState>)
    }

    fn on_nak(&mut self) -> Result<(), String> {
        self.naks += 1;
        if self.naks > self.config.max_errors {
            return Err(format!("receiver rejected block {} times", self.naks));
        }
        Ok(())
    }

    fn ignore(self: Box<Self>, byte: u8) -> Result<Box<dyn SenderState>, SenderError>
    where
        SenderFsm<S>: SenderState,
        S: 'static,
    {
        warn!("Unexpected {} in state {}, ignoring", byte_name(byte), Self::state_name());
        Ok(self as Box<dyn SenderState>)
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderFsm<AwaitingStart> {
    fn begin(mut self, mode: Mode) -> Result<Box<dyn SenderState>, SenderError> {
        self.mode = mode;
        info!("Receiver requested {} mode", mode);
        self.observer.on_start(mode);

        if self.blocks.len() <= 1 {
            self.send_eot()?;
            let next = self.transition::<AwaitingEotAck>();
            return Ok(next as Box<dyn SenderState>);
        }

        self.send_block(1)?;
        self.cursor = 2;
        let next = self.transition::<Sending>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<AwaitingStart> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        match fsm.read_byte()? {
            Some(CRC_REQUEST) => fsm.begin(Mode::Crc),
            Some(NAK) => fsm.begin(Mode::Checksum),
            Some(byte) => Box::new(fsm).ignore(byte),
            None => fsm.on_silence(),
        }
    }
}

impl SenderState for SenderFsm<Sending> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        match fsm.read_byte()? {
            Some(ACK) => {
                fsm.naks = 0;
                if fsm.cursor < fsm.blocks.len() {
                    let index = fsm.cursor;
                    fsm.send_block(index)?;
                    fsm.cursor += 1;
                    Ok(Box::new(fsm) as Box<dyn SenderState>)
                } else {
                    fsm.send_eot()?;
                    let next = fsm.transition::<AwaitingEotAck>();
                    Ok(next as Box<dyn SenderState>)
                }
            }
            Some(NAK) => {
                if let Err(reason) = fsm.on_nak() {
                    return Err(fsm.fail(reason));
                }
                fsm.cursor -= 1;
                let index = fsm.cursor;
                debug!("Resending block {}", fsm.block_number(index));
                fsm.send_block(index)?;
                fsm.cursor += 1;
                Ok(Box::new(fsm) as Box<dyn SenderState>)
            }
            // CAN is deliberately not acted on
            Some(byte) => Box::new(fsm).ignore(byte),
            None => fsm.on_silence(),
        }
    }
}

impl SenderState for SenderFsm<AwaitingEotAck> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        match fsm.read_byte()? {
            Some(ACK) => {
                info!("Transfer complete");
                fsm.observer.on_stop(0);
                let next = fsm.transition::<Done>();
                Ok(next as Box<dyn SenderState>)
            }
            Some(NAK) => {
                if let Err(reason) = fsm.on_nak() {
                    return Err(fsm.fail(reason));
                }
                fsm.send_eot()?;
                Ok(Box::new(fsm) as Box<dyn SenderState>)
            }
            Some(byte) => Box::new(fsm).ignore(byte),
            None => fsm.on_silence(),
        }
    }
}

impl SenderState for SenderFsm<Done> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        Ok(self as Box<dyn SenderState>)
    }

    fn is_done(&self) -> bool {
        true
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl SenderFsm<AwaitingStart> {
    pub fn new(
        transport: Box<dyn Transport>,
        payload: &[u8],
        config: Config,
        mut observer: Box<dyn ProgressObserver>,
    ) -> Box<dyn SenderState> {
        let blocks = chunk_payload(payload, config.block_size);
        observer.on_ready(blocks.len() - 1);

        Box::new(SenderFsm {
            state: PhantomData::<AwaitingStart>,
            transport,
            observer,
            config,
            mode: config.mode,
            blocks,
            cursor: 1,
            naks: 0,
            timeouts: 0,
        })
    }
}

pub fn run_sender(mut fsm: Box<dyn SenderState>) -> Result<(), SenderError> {
    while !fsm.is_done() {
        fsm = fsm.step()?;
    }
    Ok(())
}

/// Sends `payload` over `transport`, returning once the receiver has
/// acknowledged EOT.
pub fn send(
    transport: Box<dyn Transport>,
    payload: &[u8],
    config: Config,
    observer: Box<dyn ProgressObserver>,
) -> Result<(), SenderError> {
    config.validate()?;
    run_sender(SenderFsm::new(transport, payload, config, observer))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Splits `payload` into `block_size` blocks, padding the last one with
/// FILLER. Index 0 holds a placeholder block.
fn chunk_payload(payload: &[u8], block_size: usize) -> Vec<Vec<u8>> {
    let mut blocks = vec![vec![FILLER; block_size]];
    for chunk in payload.chunks(block_size.max(1)) {
        let mut block = chunk.to_vec();
        block.resize(block_size, FILLER);
        blocks.push(block);
    }
    blocks
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{crc16, sum8};
    use crate::observer::{Event, NoopObserver, RecordingObserver};
    use crate::transport::MockTransport;

    fn padded(data: &[u8]) -> Vec<u8> {
        let mut block = data.to_vec();
        block.resize(128, 0x1A);
        block
    }

    fn crc_frame(seq: u8, block: &[u8]) -> Vec<u8> {
        let mut frame = vec![SOH, seq, 0xFF - seq];
        frame.extend_from_slice(block);
        let crc = crc16(block);
        frame.push((crc >> 8) as u8);
        frame.push((crc & 0xFF) as u8);
        frame
    }

    fn checksum_frame(seq: u8, block: &[u8]) -> Vec<u8> {
        let mut frame = vec![SOH, seq, 0xFF - seq];
        frame.extend_from_slice(block);
        frame.push(sum8(block));
        frame
    }

    fn sender(mock: MockTransport, payload: &[u8]) -> Box<dyn SenderState> {
        SenderFsm::new(Box::new(mock), payload, Config::default(), Box::new(NoopObserver))
    }

    #[test]
    fn test_chunk_payload() {
        let payload: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
        let blocks = chunk_payload(&payload, 128);

        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b.len() == 128));
        assert_eq!(&blocks[1][..], &payload[..128]);
        assert_eq!(&blocks[2][..], &payload[128..256]);
        assert_eq!(&blocks[3][..44], &payload[256..]);
        assert!(blocks[3][44..].iter().all(|&b| b == 0x1A));

        assert_eq!(chunk_payload(&[], 128).len(), 1);
        assert_eq!(chunk_payload(&[0u8; 256], 128).len(), 3);
    }

    #[test]
    fn test_sender_full_transfer_crc() {
        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(ACK)];

        let mut expected_writes = crc_frame(1, &padded(b"Test data"));
        expected_writes.push(EOT);

        let mock = MockTransport::new(responses, expected_writes);
        run_sender(sender(mock, b"Test data")).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_checksum_mode_on_nak() {
        let responses = vec![Some(NAK), Some(ACK), Some(ACK)];

        let mut expected_writes = checksum_frame(1, &padded(b"old school"));
        expected_writes.push(EOT);

        let mock = MockTransport::new(responses, expected_writes);
        run_sender(sender(mock, b"old school")).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_multiple_blocks() {
        let payload: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(ACK), Some(ACK), Some(ACK)];

        let mut expected_writes = Vec::new();
        for (i, chunk) in payload.chunks(128).enumerate() {
            expected_writes.extend(crc_frame(i as u8 + 1, &padded(chunk)));
        }
        expected_writes.push(EOT);

        let mock = MockTransport::new(responses, expected_writes);
        let recorder = RecordingObserver::default();
        let fsm = SenderFsm::new(Box::new(mock), &payload, Config::default(), Box::new(recorder.clone()));
        run_sender(fsm).expect("transfer should succeed");

        let events = recorder.events();
        assert_eq!(events.first(), Some(&Event::Ready(3)));
        assert_eq!(events.get(1), Some(&Event::Start(Mode::Crc)));
        assert_eq!(events.last(), Some(&Event::Stop(0)));
        let sent_blocks: Vec<u32> = events.iter().filter_map(|e| match e {
            Event::Status(s) if s.signal == Signal::Soh => s.block,
            _ => None,
        }).collect();
        assert_eq!(sent_blocks, vec![1, 2, 3]);
    }

    #[test]
    fn test_sender_resends_same_block_on_nak() {
        let payload: Vec<u8> = (0..200).map(|i| (i * 3) as u8).collect();
        let responses = vec![
            Some(CRC_REQUEST),
            Some(ACK),
            Some(NAK),
            Some(NAK),
            Some(NAK),
            Some(ACK),
            Some(ACK),
        ];

        let block1 = crc_frame(1, &padded(&payload[..128]));
        let block2 = crc_frame(2, &padded(&payload[128..]));
        let mut expected_writes = block1;
        for _ in 0..4 {
            expected_writes.extend_from_slice(&block2);
        }
        expected_writes.push(EOT);

        let mock = MockTransport::new(responses, expected_writes);
        run_sender(sender(mock, &payload)).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_resends_eot_on_nak() {
        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(NAK), Some(ACK)];

        let mut expected_writes = crc_frame(1, &padded(b"x"));
        expected_writes.push(EOT);
        expected_writes.push(EOT);

        let mock = MockTransport::new(responses, expected_writes);
        run_sender(sender(mock, b"x")).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_ignores_unexpected_bytes() {
        let responses = vec![
            Some(b'?'),
            Some(ACK),
            Some(CRC_REQUEST),
            Some(CRC_REQUEST),
            Some(CAN),
            Some(ACK),
            Some(ACK),
        ];

        let mut expected_writes = crc_frame(1, &padded(b"noise"));
        expected_writes.push(EOT);

        let mock = MockTransport::new(responses, expected_writes);
        run_sender(sender(mock, b"noise")).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_empty_payload() {
        let responses = vec![Some(NAK), Some(ACK)];
        let mock = MockTransport::new(responses, vec![EOT]);
        run_sender(sender(mock, b"")).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_waits_through_timeouts() {
        let responses = vec![None, None, Some(CRC_REQUEST), None, Some(ACK), Some(ACK)];

        let mut expected_writes = crc_frame(1, &padded(b"slow"));
        expected_writes.push(EOT);

        let mock = MockTransport::new(responses, expected_writes);
        run_sender(sender(mock, b"slow")).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_gives_up_after_max_timeouts() {
        let config = Config { max_timeouts: 2, ..Config::default() };
        let mock = MockTransport::new(vec![None, None, None], Vec::new()).expect_close();
        let fsm = SenderFsm::new(Box::new(mock), b"data", config, Box::new(NoopObserver));

        match run_sender(fsm) {
            Err(SenderError::ExhaustedRetries(_)) => {}
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
    }

    #[test]
    fn test_sender_gives_up_after_max_naks() {
        let config = Config { max_errors: 2, ..Config::default() };
        let responses = vec![Some(CRC_REQUEST), Some(NAK), Some(NAK), Some(NAK)];

        let frame = crc_frame(1, &padded(b"bad line"));
        let mut expected_writes = Vec::new();
        for _ in 0..3 {
            expected_writes.extend_from_slice(&frame);
        }

        let mock = MockTransport::new(responses, expected_writes).expect_close();
        let fsm = SenderFsm::new(Box::new(mock), b"bad line", config, Box::new(NoopObserver));

        match run_sender(fsm) {
            Err(SenderError::ExhaustedRetries(_)) => {}
            other => panic!("expected ExhaustedRetries, got {:?}", other),
        }
    }

    #[test]
    fn test_sender_sequence_wraps() {
        let config = Config { block_size: 1, ..Config::default() };
        let payload: Vec<u8> = (0..257).map(|i| (i % 200) as u8).collect();

        let mut responses = vec![Some(NAK)];
        let mut expected_writes = Vec::new();
        for (i, &byte) in payload.iter().enumerate() {
            let seq = ((i + 1) % 256) as u8;
            expected_writes.extend_from_slice(&[SOH, seq, 0xFF - seq, byte, byte]);
            responses.push(Some(ACK));
        }
        expected_writes.push(EOT);
        responses.push(Some(ACK));

        assert_eq!(&expected_writes[255 * 5..255 * 5 + 3], &[SOH, 0x00, 0xFF]);

        let mock = MockTransport::new(responses, expected_writes);
        let fsm = SenderFsm::new(Box::new(mock), &payload, config, Box::new(NoopObserver));
        run_sender(fsm).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_counts_from_start_block_zero() {
        let config = Config { start_block: 0, ..Config::default() };
        let payload: Vec<u8> = (0..200).map(|i| i as u8).collect();

        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(ACK), Some(ACK)];

        let mut expected_writes = crc_frame(0x00, &payload[..128]);
        expected_writes.extend_from_slice(&crc_frame(0x01, &padded(&payload[128..])));
        expected_writes.push(EOT);
        assert_eq!(&expected_writes[..3], &[SOH, 0x00, 0xFF]);

        let mock = MockTransport::new(responses, expected_writes);
        let fsm = SenderFsm::new(Box::new(mock), &payload, config, Box::new(NoopObserver));
        run_sender(fsm).expect("transfer should succeed");
    }

    #[test]
    fn test_sender_start_block_wraps_past_255() {
        let config = Config { start_block: 255, ..Config::default() };
        let payload = vec![0x55u8; 256];

        let responses = vec![Some(NAK), Some(ACK), Some(ACK), Some(ACK)];

        let mut expected_writes = checksum_frame(0xFF, &payload[..128]);
        expected_writes.extend_from_slice(&checksum_frame(0x00, &payload[128..]));
        expected_writes.push(EOT);

        let mock = MockTransport::new(responses, expected_writes);
        let fsm = SenderFsm::new(Box::new(mock), &payload, config, Box::new(NoopObserver));
        run_sender(fsm).expect("transfer should succeed");
    }

    #[test]
    fn test_send_rejects_zero_block_size() {
        let config = Config { block_size: 0, ..Config::default() };
        let mock = MockTransport::new(Vec::new(), Vec::new());

        match send(Box::new(mock), b"hello", config, Box::new(NoopObserver)) {
            Err(SenderError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::InvalidInput),
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[test]
    fn test_sender_io_error_names_state() {
        struct BrokenTransport;

        impl Transport for BrokenTransport {
            fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
                Ok(())
            }

            fn read_timeout(&mut self, _buf: &mut [u8], _timeout: std::time::Duration) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "line dropped"))
            }

            fn kind(&self) -> crate::transport::TransportKind {
                crate::transport::TransportKind::Memory
            }

            fn close(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let fsm = SenderFsm::new(Box::new(BrokenTransport), b"data", Config::default(), Box::new(NoopObserver));
        match run_sender(fsm) {
            Err(SenderError::Io(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
                assert!(e.to_string().contains("AwaitingStart"));
            }
            other => panic!("expected Io error, got {:?}", other),
        }
    }
}
