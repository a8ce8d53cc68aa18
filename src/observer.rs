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

//! Progress notifications
//!
//! Observers are told what the engine is doing. Nothing they do feeds back
//! into the protocol.

use std::fmt;
use log::info;
use crate::protocol::{Mode, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub action: Action,
    pub signal: Signal,
    pub block: Option<u32>,
}

impl Status {
    pub fn send(signal: Signal, block: Option<u32>) -> Self {
        Status { action: Action::Send, signal, block }
    }

    pub fn recv(signal: Signal, block: Option<u32>) -> Self {
        Status { action: Action::Recv, signal, block }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            Action::Send => "send",
            Action::Recv => "recv",
        };
        match self.block {
            Some(block) => write!(f, "{} {} block {}", action, self.signal, block),
            None => write!(f, "{} {}", action, self.signal),
        }
    }
}

pub trait ProgressObserver: Send {
    /// Payload chunked, `block_count` blocks queued
    fn on_ready(&mut self, _block_count: usize) {}

    /// Mode settled by the first start byte
    fn on_start(&mut self, _mode: Mode) {}

    fn on_status(&mut self, _status: &Status) {}

    /// Transfer finished normally
    fn on_stop(&mut self, _code: i32) {}
}

pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// Writes every notification to the `log` facade at info level.
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_ready(&mut self, block_count: usize) {
        info!("Ready: {} blocks", block_count);
    }

    fn on_start(&mut self, mode: Mode) {
        info!("Start: {} mode", mode);
    }

    fn on_status(&mut self, status: &Status) {
        info!("Status: {}", status);
    }

    fn on_stop(&mut self, code: i32) {
        info!("Stop: code {}", code);
    }
}

// ============================================================================
// Recording Observer for Testing
// ============================================================================

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ready(usize),
    Start(Mode),
    Status(Status),
    Stop(i32),
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct RecordingObserver {
    events: std::sync::Arc<std::sync::Mutex<Vec<Event>>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
impl ProgressObserver for RecordingObserver {
    fn on_ready(&mut self, block_count: usize) {
        self.push(Event::Ready(block_count));
    }

    fn on_start(&mut self, mode: Mode) {
        self.push(Event::Start(mode));
    }

    fn on_status(&mut self, status: &Status) {
        self.push(Event::Status(*status));
    }

    fn on_stop(&mut self, code: i32) {
        self.push(Event::Stop(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(Status::send(Signal::Soh, Some(3)).to_string(), "send SOH block 3");
        assert_eq!(Status::recv(Signal::Eot, None).to_string(), "recv EOT");
    }

    #[test]
    fn test_recording_observer_shares_log() {
        let recorder = RecordingObserver::default();
        let mut boxed: Box<dyn ProgressObserver> = Box::new(recorder.clone());
        boxed.on_ready(2);
        boxed.on_start(Mode::Checksum);
        boxed.on_stop(0);
        assert_eq!(recorder.events(), vec![Event::Ready(2), Event::Start(Mode::Checksum), Event::Stop(0)]);
    }
}
