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

//! Repeating retry timer
//!
//! The timer only keeps the schedule. Whoever owns it asks [`RepeatingTimer::remaining`]
//! how long to wait, and calls [`RepeatingTimer::fire`] once the wait ran out.
//! The owner decides what a firing means for the transfer.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RepeatingTimer {
    interval: Duration,
    max_fires: u32,
    fired: u32,
    deadline: Option<Instant>,
}

impl RepeatingTimer {
    /// First firing one `interval` from now.
    pub fn start(interval: Duration, max_fires: u32) -> Self {
        Self::starting_at(Instant::now() + interval, interval, max_fires)
    }

    /// First firing right away, then every `interval`.
    pub fn start_immediate(interval: Duration, max_fires: u32) -> Self {
        Self::starting_at(Instant::now(), interval, max_fires)
    }

    fn starting_at(first: Instant, interval: Duration, max_fires: u32) -> Self {
        RepeatingTimer {
            interval,
            max_fires,
            fired: 0,
            deadline: if max_fires > 0 { Some(first) } else { None },
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn fired(&self) -> u32 {
        self.fired
    }

    pub fn is_due(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if deadline <= now)
    }

    /// Time left until the next firing, `None` once cancelled or exhausted.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Records a firing. Returns false if the timer is no longer active, in
    /// which case the owner must not act. After `max_fires` firings the
    /// timer cancels itself.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.deadline.is_none() {
            return false;
        }

        self.fired += 1;
        if self.fired >= self.max_fires {
            self.deadline = None;
        } else {
            self.deadline = Some(now + self.interval);
        }
        true
    }
}
