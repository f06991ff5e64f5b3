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

use std::{any::Any, io, path::PathBuf, sync::Arc};

use linefifo_error::{ErrorExt, StackError, StatusCode};
use snafu::{Location, Snafu};
use tokio::task::JoinError;

pub type Result<T> = std::result::Result<T, FifoError>;

/// Every failure a [`crate::LineFifo`] can report.
///
/// The type is `Clone` so a sticky fault can be handed to any number of
/// waiters; OS errors sit behind an `Arc` and keep their kind and raw code.
#[derive(Snafu, Debug, Clone)]
#[snafu(visibility(pub))]
pub enum FifoError {
    #[snafu(display("Fifo path is empty"))]
    MissingPath {
        #[snafu(implicit)]
        loc: Location,
    },

    #[snafu(display("Bad open flag {flag:?}, must start with 'r' or 'a'"))]
    InvalidMode {
        flag: String,
        #[snafu(implicit)]
        loc:  Location,
    },

    #[snafu(display("Invalid fifo configuration: {reason}"))]
    InvalidConfig {
        reason: String,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to open {}", path.display()))]
    Open {
        path:   PathBuf,
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to stat {}", path.display()))]
    Stat {
        path:   PathBuf,
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to read {} at offset {offset}", path.display()))]
    Read {
        path:   PathBuf,
        offset: u64,
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to write {}", path.display()))]
    Write {
        path:   PathBuf,
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Header needs {len} bytes but its slot holds {slot}"))]
    HeaderTooLarge {
        len:  usize,
        slot: usize,
        #[snafu(implicit)]
        loc:  Location,
    },

    #[snafu(display("Failed to encode header"))]
    EncodeHeader {
        #[snafu(source(from(serde_json::Error, Arc::new)))]
        source: Arc<serde_json::Error>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to write header {}", path.display()))]
    HeaderWrite {
        path:   PathBuf,
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to truncate {} to {len} bytes", path.display()))]
    Truncate {
        path:   PathBuf,
        len:    u64,
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to rename {} to {}", from.display(), to.display()))]
    Rename {
        from:   PathBuf,
        to:     PathBuf,
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to remove {}", path.display()))]
    Remove {
        path:   PathBuf,
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Failed to list {}", path.display()))]
    ListDir {
        path:   PathBuf,
        #[snafu(source(from(io::Error, Arc::new)))]
        source: Arc<io::Error>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Blocking file task did not complete"))]
    Join {
        #[snafu(source(from(JoinError, Arc::new)))]
        source: Arc<JoinError>,
        #[snafu(implicit)]
        loc:    Location,
    },

    #[snafu(display("Fifo went away before the operation completed"))]
    Abandoned {
        #[snafu(implicit)]
        loc: Location,
    },
}

impl FifoError {
    /// The OS error behind this failure, untranslated.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Open { source, .. }
            | Self::Stat { source, .. }
            | Self::Read { source, .. }
            | Self::Write { source, .. }
            | Self::HeaderWrite { source, .. }
            | Self::Truncate { source, .. }
            | Self::Rename { source, .. }
            | Self::Remove { source, .. }
            | Self::ListDir { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }

    pub fn io_kind(&self) -> Option<io::ErrorKind> { self.io_error().map(io::Error::kind) }

    pub fn location(&self) -> Location {
        match self {
            Self::MissingPath { loc }
            | Self::InvalidMode { loc, .. }
            | Self::InvalidConfig { loc, .. }
            | Self::Open { loc, .. }
            | Self::Stat { loc, .. }
            | Self::Read { loc, .. }
            | Self::Write { loc, .. }
            | Self::HeaderTooLarge { loc, .. }
            | Self::EncodeHeader { loc, .. }
            | Self::HeaderWrite { loc, .. }
            | Self::Truncate { loc, .. }
            | Self::Rename { loc, .. }
            | Self::Remove { loc, .. }
            | Self::ListDir { loc, .. }
            | Self::Join { loc, .. }
            | Self::Abandoned { loc } => *loc,
        }
    }
}

impl StackError for FifoError {
    fn debug_fmt(&self, layer: usize, buf: &mut Vec<String>) {
        buf.push(format!("{layer}: {self}, at {}", self.location()));
    }

    fn next(&self) -> Option<&dyn StackError> { None }
}

impl ErrorExt for FifoError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingPath { .. }
            | Self::InvalidMode { .. }
            | Self::InvalidConfig { .. }
            | Self::HeaderTooLarge { .. } => StatusCode::InvalidArgument,
            Self::EncodeHeader { .. } | Self::Join { .. } | Self::Abandoned { .. } => {
                StatusCode::Internal
            }
            _ => match self.io_kind() {
                Some(io::ErrorKind::NotFound) => StatusCode::NotFound,
                Some(io::ErrorKind::PermissionDenied) => StatusCode::PermissionDenied,
                Some(io::ErrorKind::StorageFull) => StatusCode::StorageFull,
                _ => StatusCode::Io,
            },
        }
    }

    fn as_any(&self) -> &dyn Any { self }
}
