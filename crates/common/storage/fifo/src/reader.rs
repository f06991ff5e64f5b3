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

//! Chunked reads and line extraction.
//!
//! Physical reads land in a reusable chunk buffer and are appended to an
//! accumulator. Lines are split off the front of the accumulator without
//! copying. Splitting only ever happens just after a `\n`, and that byte
//! never occurs inside a multi-byte UTF-8 sequence, so a character that
//! straddles two reads is simply held until the rest of it arrives.

use bytes::BytesMut;

use crate::{handle::PipelineState, line::Line};

#[derive(Debug)]
pub(crate) struct ReadBuffer {
    chunk:       Vec<u8>,
    capacity:    usize,
    pending:     BytesMut,
    /// Bytes of `pending` already searched for a terminator.
    scanned:     usize,
    seek_offset: u64,
    short_read:  bool,
    state:       PipelineState,
}

/// What a completed physical read asks of the read task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterRead {
    Done,
    ReadAhead,
}

impl ReadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            chunk: vec![0; capacity],
            capacity,
            pending: BytesMut::with_capacity(capacity),
            scanned: 0,
            seek_offset: 0,
            short_read: false,
            state: PipelineState::Idle,
        }
    }

    #[cfg(test)]
    pub(crate) const fn seek_offset(&self) -> u64 { self.seek_offset }

    pub(crate) const fn seek_to(&mut self, offset: u64) { self.seek_offset = offset; }

    pub(crate) const fn rebase(&mut self, reclaimed: u64) {
        self.seek_offset = self.seek_offset.saturating_sub(reclaimed);
    }

    pub(crate) const fn short_read(&self) -> bool { self.short_read }

    pub(crate) fn is_drained(&self) -> bool { self.pending.is_empty() }

    pub(crate) const fn in_flight(&self) -> bool { matches!(self.state, PipelineState::InFlight) }

    /// Split the next complete line off the accumulator.
    pub(crate) fn next_line(&mut self) -> Option<Line> {
        match self.pending[self.scanned..].iter().position(|&b| b == b'\n') {
            Some(idx) => {
                let end = self.scanned + idx + 1;
                self.scanned = 0;
                Some(Line::new(self.pending.split_to(end).freeze()))
            }
            None => {
                self.scanned = self.pending.len();
                None
            }
        }
    }

    /// Claim the pipeline. Returns false when a read is already in flight.
    pub(crate) const fn try_begin(&mut self) -> bool {
        if self.in_flight() {
            return false;
        }
        self.state = PipelineState::InFlight;
        true
    }

    /// Lend the chunk buffer to a physical read at the current seek offset.
    pub(crate) fn take_chunk(&mut self) -> (Vec<u8>, u64) {
        let mut chunk = std::mem::take(&mut self.chunk);
        if chunk.len() != self.capacity {
            chunk = vec![0; self.capacity];
        }
        (chunk, self.seek_offset)
    }

    /// Account for a physical read of `n` bytes into `chunk`.
    pub(crate) fn complete(&mut self, chunk: Vec<u8>, n: usize) -> AfterRead {
        let was_empty = self.pending.is_empty();
        self.pending.extend_from_slice(&chunk[..n]);
        self.chunk = chunk;
        self.seek_offset += n as u64;
        self.short_read = n < self.capacity;

        if was_empty && !self.short_read {
            AfterRead::ReadAhead
        } else {
            self.state = PipelineState::Idle;
            AfterRead::Done
        }
    }

    /// Give the chunk back after a failed read.
    pub(crate) fn abort(&mut self, chunk: Option<Vec<u8>>) {
        if let Some(chunk) = chunk {
            self.chunk = chunk;
        }
        self.state = PipelineState::Idle;
    }

    pub(crate) const fn finish(&mut self) { self.state = PipelineState::Idle; }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buf: &mut ReadBuffer, data: &[u8]) -> AfterRead {
        assert!(buf.try_begin());
        let (mut chunk, _) = buf.take_chunk();
        chunk[..data.len()].copy_from_slice(data);
        buf.complete(chunk, data.len())
    }

    fn drain(buf: &mut ReadBuffer) -> Vec<Vec<u8>> {
        std::iter::from_fn(|| buf.next_line())
            .map(|line| line.as_bytes().to_vec())
            .collect()
    }

    #[test]
    fn lines_are_split_at_terminators() {
        let mut buf = ReadBuffer::new(64);
        assert_eq!(feed(&mut buf, b"a\nbb\nccc\n"), AfterRead::Done);
        assert!(buf.short_read());
        assert_eq!(drain(&mut buf), vec![b"a\n".to_vec(), b"bb\n".to_vec(), b"ccc\n".to_vec()]);
        assert!(buf.is_drained());
        assert_eq!(buf.seek_offset(), 9);
    }

    #[test]
    fn partial_line_waits_for_its_terminator() {
        let mut buf = ReadBuffer::new(4);
        assert_eq!(feed(&mut buf, b"abcd"), AfterRead::ReadAhead);
        assert!(buf.in_flight());
        assert!(buf.next_line().is_none());
        assert_eq!(buf.scanned, 4);

        let (mut chunk, offset) = buf.take_chunk();
        assert_eq!(offset, 4);
        chunk[..3].copy_from_slice(b"ef\n");
        assert_eq!(buf.complete(chunk, 3), AfterRead::Done);
        assert!(!buf.in_flight());

        let line = buf.next_line().unwrap();
        assert_eq!(line, "abcdef\n");
        assert!(buf.is_drained());
    }

    #[test]
    fn multibyte_character_split_across_reads_is_reassembled() {
        let text = "x€y\n".as_bytes();
        let mut whole = ReadBuffer::new(64);
        feed(&mut whole, text);
        let expected = drain(&mut whole);

        let mut split = ReadBuffer::new(2);
        let mut lines = Vec::new();
        for piece in text.chunks(2) {
            split.finish();
            feed(&mut split, piece);
            lines.extend(drain(&mut split));
        }
        assert_eq!(lines, expected);
        assert_eq!(std::str::from_utf8(&lines[0]).unwrap(), "x€y\n");
    }

    #[test]
    fn read_ahead_only_after_a_full_read_into_an_empty_buffer() {
        let mut buf = ReadBuffer::new(4);
        assert_eq!(feed(&mut buf, b"ab"), AfterRead::Done);
        buf.finish();
        assert_eq!(feed(&mut buf, b"cdef"), AfterRead::Done, "buffer was not empty");
        buf.finish();
        drain(&mut buf);
        assert_eq!(feed(&mut buf, b""), AfterRead::Done);
        assert!(buf.short_read());
    }

    #[test]
    fn second_begin_is_refused_while_in_flight() {
        let mut buf = ReadBuffer::new(8);
        assert!(buf.try_begin());
        assert!(!buf.try_begin());
        let (chunk, _) = buf.take_chunk();
        buf.abort(Some(chunk));
        assert!(buf.try_begin());
    }

    #[test]
    fn rebase_moves_the_seek_offset_back() {
        let mut buf = ReadBuffer::new(8);
        buf.seek_to(300);
        buf.rebase(100);
        assert_eq!(buf.seek_offset(), 200);
        buf.rebase(1000);
        assert_eq!(buf.seek_offset(), 0);
    }
}
