// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Write accumulation and flush bookkeeping.
//!
//! Every submission bumps `submitted`; every completed physical write bumps
//! `durable`. A flush waiter remembers the `submitted` count at the moment
//! it registered and is released once `durable` catches up, strictly in
//! registration order.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::{
    error::{FifoError, Result},
    handle::PipelineState,
};

#[derive(Debug)]
struct FlushWaiter {
    watermark: u64,
    done:      oneshot::Sender<Result<()>>,
}

#[derive(Debug, Default)]
pub(crate) struct WriteQueue {
    pending:     BytesMut,
    submitted:   u64,
    durable:     u64,
    waiters:     VecDeque<FlushWaiter>,
    state:       PipelineState,
    timer_armed: bool,
}

impl WriteQueue {
    pub(crate) fn push(&mut self, parts: &[&[u8]]) {
        for part in parts {
            self.pending.extend_from_slice(part);
            self.submitted += part.len() as u64;
        }
    }

    pub(crate) fn pending_len(&self) -> usize { self.pending.len() }

    #[cfg(test)]
    pub(crate) const fn submitted(&self) -> u64 { self.submitted }

    #[cfg(test)]
    pub(crate) const fn durable(&self) -> u64 { self.durable }

    pub(crate) const fn in_flight(&self) -> bool { matches!(self.state, PipelineState::InFlight) }

    /// Arm the debounce timer unless it already is. Returns whether the
    /// caller must start one.
    pub(crate) const fn arm_timer(&mut self) -> bool {
        if self.timer_armed {
            return false;
        }
        self.timer_armed = true;
        true
    }

    pub(crate) const fn disarm_timer(&mut self) { self.timer_armed = false; }

    /// Claim the pipeline if there is something to write and nothing in
    /// flight.
    pub(crate) fn try_begin(&mut self) -> bool {
        if self.in_flight() || self.pending.is_empty() {
            return false;
        }
        self.state = PipelineState::InFlight;
        true
    }

    /// Everything submitted so far, as one chunk.
    pub(crate) fn take_chunk(&mut self) -> Option<Bytes> {
        (!self.pending.is_empty()).then(|| self.pending.split().freeze())
    }

    pub(crate) const fn finish(&mut self) { self.state = PipelineState::Idle; }

    /// Record a completed physical write and release every waiter it covers.
    pub(crate) fn complete(&mut self, written: u64) {
        self.durable += written;
        while let Some(waiter) = self.waiters.front() {
            if waiter.watermark > self.durable {
                break;
            }
            if let Some(waiter) = self.waiters.pop_front() {
                let _ = waiter.done.send(Ok(()));
            }
        }
        if self.durable == self.submitted {
            self.durable = 0;
            self.submitted = 0;
        }
    }

    /// Release every waiter with `err` and drop what was never written.
    pub(crate) fn fail(&mut self, err: &FifoError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.done.send(Err(err.clone()));
        }
        self.pending.clear();
        self.state = PipelineState::Idle;
    }

    /// Register a flush for everything submitted so far. `None` means it is
    /// already durable.
    pub(crate) fn register(&mut self) -> Option<oneshot::Receiver<Result<()>>> {
        if self.durable >= self.submitted {
            return None;
        }
        let (done, rx) = oneshot::channel();
        self.waiters.push_back(FlushWaiter {
            watermark: self.submitted,
            done,
        });
        Some(rx)
    }
}
