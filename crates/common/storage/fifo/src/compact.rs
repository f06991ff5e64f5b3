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

//! In-place reclamation of the consumed prefix.
//!
//! The live tail `[position, len)` is copied down to `reserved` block by
//! block, front to back, and the file is truncated only once the copy is
//! complete. Compaction only runs when the tail is no longer than the
//! consumed span, so a block is never written over bytes that have yet to
//! be read, and a failure part way leaves every unread record where it was.

use std::{fs::OpenOptions, os::unix::fs::FileExt, path::Path};

use snafu::ResultExt;
use tracing::{debug, info};

use crate::{
    LineFifo,
    config::CompactOptions,
    error::{OpenSnafu, ReadSnafu, Result, StatSnafu, TruncateSnafu, WriteSnafu},
    fifo::blocking,
};

/// Why a compaction did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SkipReason {
    #[display("nothing has been consumed")]
    NothingConsumed,
    #[display("file is below the minimum size")]
    TooSmall,
    #[display("consumed share is below the threshold")]
    BelowRatio,
    #[display("live tail is longer than the consumed prefix")]
    TailTooLong,
    #[display("read cursor lies past the end of the file")]
    CursorPastEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactOutcome {
    Skipped(SkipReason),
    Compacted {
        /// Bytes cut from the front of the record region.
        reclaimed: u64,
        new_len:   u64,
    },
}

fn eligibility(
    options: &CompactOptions,
    len: u64,
    reserved: u64,
    position: u64,
) -> std::result::Result<(), SkipReason> {
    if position > len {
        return Err(SkipReason::CursorPastEnd);
    }
    if position <= reserved {
        return Err(SkipReason::NothingConsumed);
    }
    if len < options.min_size {
        return Err(SkipReason::TooSmall);
    }
    #[allow(clippy::cast_precision_loss)]
    let consumed = position as f64 / len as f64;
    if consumed < options.effective_ratio() {
        return Err(SkipReason::BelowRatio);
    }
    if len - position > position - reserved {
        return Err(SkipReason::TailTooLong);
    }
    Ok(())
}

/// Copy `[position, len)` down to `reserved` and truncate. Blocking.
fn compact_in_place(
    path: &Path,
    reserved: u64,
    position: u64,
    options: &CompactOptions,
) -> Result<CompactOutcome> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .context(OpenSnafu { path })?;
    let len = file.metadata().context(StatSnafu { path })?.len();

    if let Err(reason) = eligibility(options, len, reserved, position) {
        return Ok(CompactOutcome::Skipped(reason));
    }

    let mut buf = vec![0; options.buffer_size.max(1)];
    let (mut src, mut dst) = (position, reserved);
    loop {
        let n = file
            .read_at(&mut buf, src)
            .context(ReadSnafu { path, offset: src })?;
        if n == 0 {
            break;
        }
        file.write_all_at(&buf[..n], dst).context(WriteSnafu { path })?;
        src += n as u64;
        dst += n as u64;
    }

    file.set_len(dst).context(TruncateSnafu { path, len: dst })?;
    file.sync_data().context(WriteSnafu { path })?;

    Ok(CompactOutcome::Compacted {
        reclaimed: position - reserved,
        new_len:   dst,
    })
}

impl LineFifo {
    /// Reclaim the consumed prefix of the file when `options` allow it.
    ///
    /// Physical reads and writes wait while the copy runs. On success the
    /// cursors are shifted down and the header is rewritten before this
    /// returns. Failures are returned without faulting the handle.
    pub async fn compact(&self, options: &CompactOptions) -> Result<CompactOutcome> {
        let shared = &self.shared;
        shared.acquire().await?;
        let _gate = shared.io_gate.write().await;

        let (reserved, position) = {
            let state = shared.state.lock();
            (state.cursors.reserved, state.cursors.position)
        };
        let path = self.path();
        let outcome = {
            let path = path.clone();
            let options = options.clone();
            blocking(move || compact_in_place(&path, reserved, position, &options)).await??
        };

        let CompactOutcome::Compacted { reclaimed, new_len } = outcome else {
            debug!(path = %path.display(), ?outcome, "compaction skipped");
            return Ok(outcome);
        };

        {
            let _serial = shared.header_lock.lock();
            let (cursors, slot) = {
                let mut state = shared.state.lock();
                state.rebase(reclaimed);
                (state.cursors, state.slot)
            };
            shared.store_cursors(cursors, slot, reclaimed)?;
        }

        info!(path = %path.display(), reclaimed, new_len, "fifo compacted");
        Ok(outcome)
    }
}
