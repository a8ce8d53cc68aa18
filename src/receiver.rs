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
use std::time::{Duration, Instant};
use log::{debug, info, warn};
use thiserror::Error;
use crate::config::Config;
use crate::frame::{decode_block, frame_len, seq_byte, FrameError};
use crate::observer::{ProgressObserver, Status};
use crate::protocol::*;
use crate::storage::Storage;
use crate::timer::RepeatingTimer;
use crate::transport::{Transport, TransportKind};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("retries exhausted: {0}")]
    ExhaustedRetries(String),
    #[error("failed to store received data: {0}")]
    StorageWriteFailure(#[source] io::Error),
}

// ============================================================================
// States
// ============================================================================

pub struct Negotiating;
pub struct Receiving;
pub struct Done;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    transport: Box<dyn Transport>,
    storage: Box<dyn Storage>,
    observer: Box<dyn ProgressObserver>,
    config: Config,
    mode: Mode,
    probe: RepeatingTimer,
    /// A 'C' went out, so a late sender may still answer in CRC mode
    crc_requested: bool,
    /// Set once the first block is accepted; the trailer width is fixed from then on
    mode_locked: bool,
    pending: Vec<u8>,
    chunks: Vec<Vec<u8>>,
    expected: u32,
    errors: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    /// Handles one event: an inbound chunk, a probe timer firing or silence.
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError>;

    fn is_done(&self) -> bool {
        false
    }
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            transport: self.transport,
            storage: self.storage,
            observer: self.observer,
            config: self.config,
            mode: self.mode,
            probe: self.probe,
            crc_requested: self.crc_requested,
            mode_locked: self.mode_locked,
            pending: self.pending,
            chunks: self.chunks,
            expected: self.expected,
            errors: self.errors,
        })
    }

    fn state_name() -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    fn io_error(&self, e: io::Error) -> ReceiverError {
        ReceiverError::Io(io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, Self::state_name())
        ))
    }

    fn send_signal(&mut self, signal: Signal, block: Option<u32>) -> Result<(), ReceiverError> {
        self.transport.write_all(&[signal.as_byte()]).map_err(|e| self.io_error(e))?;
        match block {
            Some(block) => debug!("Sent: {} for block {}", signal, block),
            None => debug!("Sent: {}", signal),
        }
        self.observer.on_status(&Status::send(signal, block));
        Ok(())
    }

    /// Reads whatever arrives within `wait` into the pending buffer.
    /// Returns false on timeout. The buffer fits a CRC frame in either mode.
    fn fill(&mut self, wait: Duration) -> Result<bool, ReceiverError> {
        let mut buf = vec![0u8; frame_len(self.config.block_size, Mode::Crc)];
        match self.transport.read_timeout(&mut buf, wait) {
            Ok(0) => Ok(false),
            Ok(n) => {
                debug!("Received: {} bytes", n);
                self.pending.extend_from_slice(&buf[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn teardown(&mut self) {
        match self.transport.kind() {
            TransportKind::Stream => debug!("Shutting down stream"),
            TransportKind::Serial => debug!("Releasing serial port"),
            TransportKind::Memory => debug!("Closing in-memory pipe"),
        }
        if let Err(e) = self.transport.close() {
            warn!("Failed to release transport: {}", e);
        }
    }

    fn fail(mut self, reason: String) -> ReceiverError {
        warn!("Giving up: {}", reason);
        self.probe.cancel();
        self.teardown();
        ReceiverError::ExhaustedRetries(reason)
    }

    /// Acknowledges EOT and hands the reassembled data to storage.
    fn finish(mut self) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        self.probe.cancel();
        self.send_signal(Signal::Ack, None)?;

        if let Some(last) = self.chunks.last_mut() {
            trim_filler(last);
        }

        let stored = self.storage.store(&self.chunks);
        self.teardown();
        stored.map_err(ReceiverError::StorageWriteFailure)?;

        let bytes: usize = self.chunks.iter().map(Vec::len).sum();
        info!("Transfer complete: {} blocks, {} bytes", self.chunks.len(), bytes);
        self.observer.on_stop(0);
        let next = self.transition::<Done>();
        Ok(next as Box<dyn ReceiverState>)
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverFsm<Negotiating> {
    /// Probe timer callback. Only `Negotiating` owns the timer, so leaving
    /// that state is what stops the probes.
    fn on_probe(&mut self, now: Instant) -> Result<(), ReceiverError> {
        if !self.probe.fire(now) {
            return Ok(());
        }
        let signal = match self.mode {
            Mode::Crc => {
                self.crc_requested = true;
                Signal::CrcRequest
            }
            Mode::Checksum => Signal::Nak,
        };
        debug!("Probe {} ({} mode)", self.probe.fired(), self.mode);
        self.send_signal(signal, None)
    }

    fn probes_exhausted(mut self) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        match self.mode {
            Mode::Crc => {
                info!("No answer to CRC requests, falling back to checksum mode");
                self.mode = Mode::Checksum;
                self.probe = RepeatingTimer::start_immediate(self.config.timeout, self.config.nak_attempts());
                Ok(Box::new(self) as Box<dyn ReceiverState>)
            }
            Mode::Checksum => {
                let reason = format!("sender did not answer {} probes", self.probe.fired());
                Err(self.fail(reason))
            }
        }
    }

    fn drain(mut self) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        while let Some(&byte) = self.pending.first() {
            match byte {
                SOH => {
                    self.probe.cancel();
                    return self.transition::<Receiving>().drain();
                }
                EOT => {
                    info!("Sender has nothing to send");
                    self.pending.remove(0);
                    return self.finish();
                }
                _ => {
                    warn!("Unexpected {} while negotiating, ignoring", byte_name(byte));
                    self.pending.remove(0);
                }
            }
        }
        Ok(Box::new(self) as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<Negotiating> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        let now = Instant::now();
        if fsm.probe.is_due(now) {
            fsm.on_probe(now)?;
            return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
        }

        let wait = fsm.probe.remaining(now).unwrap_or(fsm.config.timeout);
        if fsm.fill(wait)? {
            fsm.drain()
        } else if fsm.probe.is_active() {
            // The wait ran until the deadline
            fsm.on_probe(Instant::now())?;
            Ok(Box::new(fsm) as Box<dyn ReceiverState>)
        } else {
            fsm.probes_exhausted()
        }
    }
}

impl ReceiverFsm<Receiving> {
    /// Picks the trailer width for the first block. After falling back to
    /// checksum a sender may still be answering an earlier 'C', so a frame
    /// that validates as CRC switches the transfer to CRC. Returns false
    /// while too few bytes are buffered to tell.
    fn settle_mode(&mut self) -> bool {
        if self.mode_locked || !self.crc_requested || self.mode == Mode::Crc {
            return true;
        }
        let block_size = self.config.block_size;
        let crc_len = frame_len(block_size, Mode::Crc);
        let sum_len = frame_len(block_size, Mode::Checksum);

        if self.pending.len() >= crc_len
            && decode_block(&self.pending[..crc_len], self.expected, block_size, Mode::Crc).is_ok()
        {
            info!("Sender answered a CRC request late, switching to crc mode");
            self.mode = Mode::Crc;
            return true;
        }
        self.pending.len() >= crc_len
            || (self.pending.len() >= sum_len
                && decode_block(&self.pending[..sum_len], self.expected, block_size, Mode::Checksum).is_ok())
    }

    fn accept_frame(mut self, frame: Vec<u8>) -> Result<Self, ReceiverError> {
        let block = self.expected;
        match decode_block(&frame, block, self.config.block_size, self.mode) {
            Ok(payload) => {
                let payload = payload.to_vec();
                if !self.mode_locked {
                    self.mode_locked = true;
                    info!("Sender started in {} mode", self.mode);
                    self.observer.on_start(self.mode);
                }
                self.chunks.push(payload);
                self.observer.on_status(&Status::recv(Signal::Soh, Some(block)));
                self.send_signal(Signal::Ack, Some(block))?;
                self.errors = 0;
                self.expected += 1;
            }
            // A repeat of the last block answers our NAK, so that ACK was lost.
            // Without a NAK outstanding it answers a stale probe and is dropped.
            Err(FrameError::OutOfSync { got, .. })
                if block > self.config.start_block && got == seq_byte(block - 1) =>
            {
                if self.errors > 0 {
                    debug!("Duplicate of block {}, acknowledging again", block - 1);
                    self.send_signal(Signal::Ack, Some(block - 1))?;
                } else {
                    debug!("Duplicate of block {} without a NAK, dropping", block - 1);
                }
            }
            Err(e) if e.wants_nak() => {
                self.errors += 1;
                warn!("Block {}: {} (error {} of {})", block, e, self.errors, self.config.max_errors);
                if self.errors > self.config.max_errors {
                    let reason = format!("block {} failed {} times", block, self.errors);
                    return Err(self.fail(reason));
                }
                self.pending.clear();
                self.send_signal(Signal::Nak, Some(block))?;
            }
            Err(e) => {
                debug!("Dropping frame: {}", e);
            }
        }
        Ok(self)
    }

    fn drain(mut self) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        while let Some(&byte) = self.pending.first() {
            match byte {
                SOH => {
                    if !self.settle_mode() {
                        break;
                    }
                    let needed = frame_len(self.config.block_size, self.mode);
                    if self.pending.len() < needed {
                        break;
                    }
                    let frame: Vec<u8> = self.pending.drain(..needed).collect();
                    self = self.accept_frame(frame)?;
                }
                EOT => {
                    debug!("Received: EOT");
                    self.pending.remove(0);
                    return self.finish();
                }
                _ => {
                    warn!("Unexpected {} while receiving, ignoring", byte_name(byte));
                    self.pending.remove(0);
                }
            }
        }
        Ok(Box::new(self) as Box<dyn ReceiverState>)
    }

    fn on_stall(mut self) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        self.errors += 1;
        let block = self.expected;
        warn!(
            "Timed out waiting for block {} ({} partial bytes, error {} of {})",
            block,
            self.pending.len(),
            self.errors,
            self.config.max_errors
        );
        if self.errors > self.config.max_errors {
            let reason = format!("no complete block {} after {} attempts", block, self.errors);
            return Err(self.fail(reason));
        }
        self.pending.clear();
        self.send_signal(Signal::Nak, Some(block))?;
        Ok(Box::new(self) as Box<dyn ReceiverState>)
    }
}

impl ReceiverState for ReceiverFsm<Receiving> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;
        let wait = fsm.config.timeout;
        if fsm.fill(wait)? {
            fsm.drain()
        } else {
            fsm.on_stall()
        }
    }
}

impl ReceiverState for ReceiverFsm<Done> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        Ok(self as Box<dyn ReceiverState>)
    }

    fn is_done(&self) -> bool {
        true
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ReceiverFsm<Negotiating> {
    pub fn new(
        transport: Box<dyn Transport>,
        storage: Box<dyn Storage>,
        config: Config,
        observer: Box<dyn ProgressObserver>,
    ) -> Box<dyn ReceiverState> {
        let attempts = match config.mode {
            Mode::Crc => config.crc_attempts,
            Mode::Checksum => config.nak_attempts(),
        };

        Box::new(ReceiverFsm {
            state: PhantomData::<Negotiating>,
            transport,
            storage,
            observer,
            config,
            mode: config.mode,
            probe: RepeatingTimer::start_immediate(config.timeout, attempts),
            crc_requested: false,
            mode_locked: false,
            pending: Vec::new(),
            chunks: Vec::new(),
            expected: config.start_block,
            errors: 0,
        })
    }
}

pub fn run_receiver(mut fsm: Box<dyn ReceiverState>) -> Result<(), ReceiverError> {
    while !fsm.is_done() {
        fsm = fsm.step()?;
    }
    Ok(())
}

/// Receives one transfer from `transport` into `storage`.
pub fn receive(
    transport: Box<dyn Transport>,
    storage: Box<dyn Storage>,
    config: Config,
    observer: Box<dyn ProgressObserver>,
) -> Result<(), ReceiverError> {
    config.validate()?;
    run_receiver(ReceiverFsm::new(transport, storage, config, observer))
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Strips trailing FILLER bytes from the final block.
pub fn trim_filler(chunk: &mut Vec<u8>) {
    while chunk.last() == Some(&FILLER) {
        chunk.pop();
    }
}

// ============================================================================
// Tests
// ============================================================================
