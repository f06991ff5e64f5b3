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

//! The checkpoint header.
//!
//! A header is a compact JSON record padded with spaces to a fixed slot and
//! terminated by a newline:
//!
//! ```text
//! {"v":0,"skip":0,"position":120,"wpos":4096,"rtime":1700000000000}      ...\n
//! ```
//!
//! It lives either in a `<data>.hd` sidecar or in the first `skip` bytes of
//! the data file. Readers tolerate a missing or damaged header and fall back
//! to empty cursors.

use std::{
    ffi::OsString,
    fs::{File, OpenOptions},
    io::{self, Read},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tracing::{debug, warn};

use crate::{
    config::HeaderPlacement,
    error::{EncodeHeaderSnafu, HeaderTooLargeSnafu, HeaderWriteSnafu, Result},
};

pub const HEADER_VERSION: u32 = 0;
pub const SIDECAR_SUFFIX: &str = ".hd";

const FILLER: u8 = b' ';

/// An embedded header may have been written with a larger slot than the one
/// configured now. It ends at its own newline, so reading further is harmless.
/// No header slot is trusted beyond this or the configured size.
pub(crate) const HEADER_READ_LIMIT: usize = 4096;

/// Cursor state persisted across restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Bytes reserved at the front of the data file for an embedded header.
    pub reserved:       u64,
    /// Offset of the first line not yet handed out.
    pub position:       u64,
    /// Offset just past the last durable write.
    pub write_position: u64,
    /// Milliseconds since the Unix epoch of the last physical read that
    /// returned data.
    pub last_read_ms:   u64,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(default)]
struct Record {
    v:        u32,
    skip:     u64,
    position: u64,
    wpos:     u64,
    rtime:    u64,
}

impl From<&Checkpoint> for Record {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            v:        HEADER_VERSION,
            skip:     cp.reserved,
            position: cp.position,
            wpos:     cp.write_position,
            rtime:    cp.last_read_ms,
        }
    }
}

impl Checkpoint {
    /// Empty cursors for a file whose records start at `reserved`.
    pub const fn at(reserved: u64) -> Self {
        Self {
            reserved,
            position: reserved,
            write_position: reserved,
            last_read_ms: 0,
        }
    }

    /// Largest possible record, used to prove a slot can always hold a
    /// header before any data is trusted to it.
    const fn worst_case() -> Self {
        Self {
            reserved:       u64::MAX,
            position:       u64::MAX,
            write_position: u64::MAX,
            last_read_ms:   u64::MAX,
        }
    }

    /// Serialize into exactly `slot` bytes.
    pub fn encode(&self, slot: usize) -> Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(&Record::from(self)).context(EncodeHeaderSnafu)?;
        ensure!(
            buf.len() < slot,
            HeaderTooLargeSnafu {
                len: buf.len() + 1,
                slot,
            }
        );
        buf.resize(slot - 1, FILLER);
        buf.push(b'\n');
        Ok(buf)
    }

    /// Parse a header slot. Anything unreadable yields `None`; absent fields
    /// default to zero.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let end = buf.iter().position(|&b| b == b'\n').unwrap_or(buf.len());
        let text = buf[..end].trim_ascii();
        if text.is_empty() {
            return None;
        }
        let record: Record = serde_json::from_slice(text).ok()?;
        Some(Self {
            reserved:       record.skip,
            position:       record.position,
            write_position: record.wpos,
            last_read_ms:   record.rtime,
        })
    }

    /// Clamp cursors loaded from disk so none points into the reserved
    /// region.
    pub(crate) fn rebased_on(self, reserved: u64) -> Self {
        Self {
            reserved,
            position: self.position.max(reserved),
            write_position: self.write_position.max(reserved),
            last_read_ms: self.last_read_ms,
        }
    }
}

/// Fail unless `slot` can hold any header this crate will ever write.
pub(crate) fn check_slot(slot: usize) -> Result<()> {
    Checkpoint::worst_case().encode(slot).map(drop)
}

pub fn sidecar_path(data: &Path) -> PathBuf {
    let mut name = OsString::from(data.as_os_str());
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Where a handle reads and writes its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeaderLocation {
    path:      PathBuf,
    placement: HeaderPlacement,
}

impl HeaderLocation {
    pub(crate) fn new(data: &Path, placement: HeaderPlacement) -> Self {
        let path = match placement {
            HeaderPlacement::Sidecar => sidecar_path(data),
            HeaderPlacement::Embedded => data.to_path_buf(),
        };
        Self { path, placement }
    }

    pub(crate) fn path(&self) -> &Path { &self.path }

    /// Read at most `limit` bytes of header. A header that cannot be read
    /// or parsed is reported as absent.
    pub(crate) fn load(&self, limit: usize) -> Option<Checkpoint> {
        let mut buf = Vec::with_capacity(limit);
        let read = File::open(&self.path)
            .and_then(|file| file.take(limit as u64).read_to_end(&mut buf));
        match read {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "unreadable fifo header ignored");
                return None;
            }
        }
        let decoded = Checkpoint::decode(&buf);
        if decoded.is_none() && !buf.is_empty() && self.placement == HeaderPlacement::Sidecar {
            warn!(path = %self.path.display(), "corrupt fifo header ignored");
        }
        decoded
    }

    /// Write an encoded header at offset zero and wait for it to reach disk.
    pub(crate) fn store(&self, encoded: &[u8]) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .and_then(|file| {
                file.write_all_at(encoded, 0)?;
                file.sync_data()?;
                Ok(file)
            })
            .context(HeaderWriteSnafu { path: &self.path })?;
        drop(file);
        debug!(path = %self.path.display(), len = encoded.len(), "fifo header written");
        Ok(())
    }
}
