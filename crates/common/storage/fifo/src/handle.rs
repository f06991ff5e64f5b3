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

use std::{
    fs::File,
    io::Write as _,
    path::Path,
    sync::Arc,
    time::Instant,
};

use snafu::ResultExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    config::{FifoConfig, HeaderPlacement},
    error::{OpenSnafu, Result, StatSnafu, WriteSnafu},
    header::{self, Checkpoint, HEADER_READ_LIMIT, HeaderLocation},
};

/// Whether a pipeline has a physical operation outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum PipelineState {
    #[default]
    Idle,
    InFlight,
}

pub(crate) type OpenWaiter = oneshot::Sender<Result<Arc<File>>>;

/// The descriptor slot of a handle.
#[derive(Debug, Default)]
pub(crate) enum Descriptor {
    #[default]
    Closed,
    /// An open is running; later callers queue here for its outcome.
    Opening(Vec<OpenWaiter>),
    Open {
        file:      Arc<File>,
        opened_at: Instant,
    },
}

impl Descriptor {
    pub(crate) const fn is_open(&self) -> bool { matches!(self, Self::Open { .. }) }
}

/// Result of a physical open.
#[derive(Debug)]
pub(crate) struct Opened {
    pub(crate) file:       Arc<File>,
    /// Cursors loaded from the header. Only present on the first open of a
    /// handle; later opens keep the in-memory cursors.
    pub(crate) checkpoint: Option<Checkpoint>,
    /// Header slot size for this session.
    pub(crate) slot:       usize,
}

/// Vet a stored header against the file it describes. An embedded
/// reservation larger than any slot this crate reads, or than the file
/// itself, marks the whole record as damaged. A read cursor past the end of
/// the file belongs to an earlier file of the same name and restarts at the
/// front.
fn plausible(
    cp: Checkpoint,
    placement: HeaderPlacement,
    limit: usize,
    file_len: u64,
    data: &Path,
) -> Option<Checkpoint> {
    let oversized = cp.reserved > limit as u64 || cp.reserved > file_len;
    if placement == HeaderPlacement::Embedded && oversized {
        warn!(
            path = %data.display(),
            skip = cp.reserved,
            len = file_len,
            "implausible fifo header ignored"
        );
        return None;
    }
    if cp.position > file_len {
        warn!(
            path = %data.display(),
            position = cp.position,
            len = file_len,
            "stale read cursor reset"
        );
        return Some(Checkpoint {
            position: 0,
            ..cp
        });
    }
    Some(cp)
}

/// Open the data file and, when `load_header` is set, establish the
/// reserved region and load the persisted cursors.
///
/// Runs on the blocking pool.
pub(crate) fn open_descriptor(
    data: &Path,
    config: &FifoConfig,
    load_header: bool,
) -> Result<Opened> {
    let file = config.mode.open_options().open(data).context(OpenSnafu { path: data })?;
    let mut file_len = file.metadata().context(StatSnafu { path: data })?.len();
    debug!(path = %data.display(), mode = %config.mode, len = file_len, "fifo descriptor opened");

    if !load_header {
        return Ok(Opened {
            file:       Arc::new(file),
            checkpoint: None,
            slot:       0,
        });
    }

    let location = HeaderLocation::new(data, config.header);
    let limit = config.header_size.max(HEADER_READ_LIMIT);
    let stored = location
        .load(limit)
        .and_then(|cp| plausible(cp, config.header, limit, file_len, data));

    let (reserved, slot) = match config.header {
        HeaderPlacement::Sidecar => (0, config.header_size),
        HeaderPlacement::Embedded => {
            let reserved = stored
                .map(|cp| cp.reserved)
                .filter(|&skip| skip > 0)
                .unwrap_or(config.header_size as u64);
            (reserved, usize::try_from(reserved).unwrap_or(usize::MAX))
        }
    };
    header::check_slot(slot)?;

    let mut checkpoint =
        stored.map_or_else(|| Checkpoint::at(reserved), |cp| cp.rebased_on(reserved));

    if config.mode.can_write() {
        if config.header == HeaderPlacement::Embedded && file_len == 0 {
            (&file)
                .write_all(&checkpoint.encode(slot)?)
                .context(WriteSnafu { path: data })?;
            file_len = reserved;
        }
        checkpoint.write_position = file_len.max(reserved);
    }

    info!(
        path = %data.display(),
        reserved,
        position = checkpoint.position,
        write_position = checkpoint.write_position,
        "fifo opened"
    );

    Ok(Opened {
        file: Arc::new(file),
        checkpoint: Some(checkpoint),
        slot,
    })
}
