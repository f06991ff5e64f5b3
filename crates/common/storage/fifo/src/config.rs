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

use std::{fs::OpenOptions, time::Duration};

use bon::Builder;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ensure;
use tracing::warn;

use crate::error::{InvalidConfigSnafu, InvalidModeSnafu, Result};

pub const DEFAULT_READ_SIZE: usize = 64 * 1024;
pub const DEFAULT_WRITE_SIZE: usize = 16 * 1024;
pub const DEFAULT_WRITE_DELAY: Duration = Duration::from_millis(2);
pub const DEFAULT_HEADER_SIZE: usize = 200;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MIN_RATIO: f64 = 2.0 / 3.0;
/// Smallest consumed ratio compaction accepts. Below one half the live tail
/// could overlap the span it is copied into.
pub const MIN_COMPACT_RATIO: f64 = 0.5;

/// How the data file is opened. Reads are always positional and writes
/// always append.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    #[default]
    #[display("r")]
    ReadOnly,
    #[display("a")]
    AppendOnly,
    #[display("r+")]
    ReadWrite,
}

impl OpenMode {
    /// Parse an intent flag: `r` reads, `a` appends, a `+` anywhere asks
    /// for both.
    pub fn from_flag(flag: &str) -> Result<Self> {
        let both = flag.contains('+');
        match flag.chars().next() {
            Some('r') if both => Ok(Self::ReadWrite),
            Some('r') => Ok(Self::ReadOnly),
            Some('a') if both => Ok(Self::ReadWrite),
            Some('a') => Ok(Self::AppendOnly),
            _ => InvalidModeSnafu { flag }.fail(),
        }
    }

    pub const fn can_read(self) -> bool { matches!(self, Self::ReadOnly | Self::ReadWrite) }

    pub const fn can_write(self) -> bool { matches!(self, Self::AppendOnly | Self::ReadWrite) }

    pub(crate) fn open_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Self::ReadOnly => options.read(true),
            Self::AppendOnly => options.append(true).create(true),
            Self::ReadWrite => options.read(true).append(true).create(true),
        };
        options
    }
}

/// Where the checkpoint header lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderPlacement {
    /// A separate `<data>.hd` file.
    #[default]
    Sidecar,
    /// A reserved region at the front of the data file itself.
    Embedded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Hand writes to the OS and return.
    #[default]
    Async,
    /// Follow every physical write with `fdatasync`.
    Sync,
}

/// Settings for one [`crate::LineFifo`] handle.
#[derive(Debug, Clone, PartialEq, SmartDefault, Builder, Serialize, Deserialize)]
#[builder(finish_fn = build)]
#[serde(default)]
pub struct FifoConfig {
    #[builder(default)]
    pub mode: OpenMode,

    /// Bytes requested per physical read.
    #[default(DEFAULT_READ_SIZE)]
    #[builder(default = DEFAULT_READ_SIZE)]
    pub read_size: usize,

    /// Pending bytes that trigger an immediate physical write.
    #[default(DEFAULT_WRITE_SIZE)]
    #[builder(default = DEFAULT_WRITE_SIZE)]
    pub write_size: usize,

    /// How long a small write waits for company before it is written.
    #[default(DEFAULT_WRITE_DELAY)]
    #[builder(default = DEFAULT_WRITE_DELAY)]
    pub write_delay: Duration,

    /// Advance the read cursor as lines are handed out. Turn off when the
    /// caller tracks consumption itself through [`crate::LineFifo::set_position`].
    #[default(true)]
    #[builder(default = true)]
    pub update_position: bool,

    /// Reopen the descriptor once it has been held this long, so a file that
    /// was replaced underneath is picked up.
    pub reopen_interval: Option<Duration>,

    #[builder(default)]
    pub header: HeaderPlacement,

    /// Size of the header slot. For embedded headers this is also the number
    /// of bytes reserved at the front of a new data file.
    #[default(DEFAULT_HEADER_SIZE)]
    #[builder(default = DEFAULT_HEADER_SIZE)]
    pub header_size: usize,

    #[builder(default)]
    pub flush_mode: FlushMode,

    /// Fallback wake-up for a reader waiting at the end of the file.
    #[default(DEFAULT_POLL_INTERVAL)]
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    pub poll_interval: Duration,
}

impl FifoConfig {
    pub fn with_mode(mode: OpenMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.read_size > 0,
            InvalidConfigSnafu {
                reason: "read_size must be positive",
            }
        );
        ensure!(
            self.write_size > 0,
            InvalidConfigSnafu {
                reason: "write_size must be positive",
            }
        );
        ensure!(
            self.header_size > 1,
            InvalidConfigSnafu {
                reason: format!("header_size {} leaves no room for a header", self.header_size),
            }
        );
        ensure!(
            !self.poll_interval.is_zero(),
            InvalidConfigSnafu {
                reason: "poll_interval must be positive",
            }
        );
        Ok(())
    }
}

/// Thresholds for [`crate::LineFifo::compact`].
#[derive(Debug, Clone, PartialEq, SmartDefault, Builder, Serialize, Deserialize)]
#[builder(finish_fn = build)]
#[serde(default)]
pub struct CompactOptions {
    /// Files smaller than this are left alone.
    #[builder(default)]
    pub min_size: u64,

    /// Consumed fraction of the file required before compacting.
    #[default(DEFAULT_MIN_RATIO)]
    #[builder(default = DEFAULT_MIN_RATIO)]
    pub min_ratio: f64,

    /// Scratch buffer used while copying the live tail.
    #[default(64 * 1024)]
    #[builder(default = 64 * 1024)]
    pub buffer_size: usize,
}

impl CompactOptions {
    /// The ratio actually enforced.
    pub fn effective_ratio(&self) -> f64 {
        if self.min_ratio < MIN_COMPACT_RATIO {
            warn!(
                min_ratio = self.min_ratio,
                enforced = MIN_COMPACT_RATIO,
                "compaction ratio raised"
            );
            MIN_COMPACT_RATIO
        } else {
            self.min_ratio
        }
    }
}
