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

//! A durable FIFO of newline-delimited records kept in a plain file.
//!
//! Producers append lines through [`LineFifo::put_line`]; writes are buffered
//! and coalesced, and [`LineFifo::flush`] resolves once everything submitted
//! before it is on disk. Consumers pull lines with [`LineFifo::get_line`],
//! [`LineFifo::read_line`] or the push-style [`LineFifo::read_lines`], and
//! persist their progress with [`LineFifo::checkpoint`] into a small
//! fixed-size header, either a `<file>.hd` sidecar or a region reserved at the
//! front of the data file. [`LineFifo::compact`] reclaims the consumed prefix
//! in place.

pub mod batch;
mod compact;
pub mod config;
pub mod error;
mod fifo;
mod handle;
pub mod header;
mod line;
mod reader;
pub mod rotate;
mod watch;
mod writer;

pub use batch::{BatchOptions, Batcher, BatchTicket};
pub use compact::{CompactOutcome, SkipReason};
pub use config::{CompactOptions, FifoConfig, FlushMode, HeaderPlacement, OpenMode};
pub use error::{FifoError, Result};
pub use fifo::LineFifo;
pub use header::Checkpoint;
pub use line::Line;
pub use rotate::{RotateReport, match_files, rotate_files};
