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

//! Numbered rotation of a file and its predecessors: `name` becomes
//! `name.1`, `name.1` becomes `name.2`, and so on. A sidecar header moves
//! with its file, so `name.hd` becomes `name.1.hd` and a reader of the new
//! `name` starts from the front.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use snafu::{IntoError, OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::{
    error::{FifoError, ListDirSnafu, MissingPathSnafu, RenameSnafu, Result},
    header::sidecar_path,
};

/// What a rotation did. Individual renames may fail without stopping the
/// rest.
#[derive(Debug, Default)]
pub struct RotateReport {
    /// New names, in the order the renames happened.
    pub renamed: Vec<PathBuf>,
    pub errors:  Vec<FifoError>,
}

impl RotateReport {
    pub fn first_error(&self) -> Option<&FifoError> { self.errors.first() }

    pub const fn is_clean(&self) -> bool { self.errors.is_empty() }
}

fn rotation_suffix(name: &str, base: &str) -> Option<Option<u64>> {
    let rest = name.strip_prefix(base)?;
    if rest.is_empty() {
        return Some(None);
    }
    let digits = rest.strip_prefix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(Some)
}

/// Files in `dir` named exactly `base` or `base.<n>`, with their numeric
/// suffix. The name is compared literally.
pub fn match_files(dir: &Path, base: &str) -> Result<Vec<(PathBuf, Option<u64>)>> {
    let entries = fs::read_dir(dir).context(ListDirSnafu { path: dir })?;
    let mut matches = Vec::new();
    for entry in entries {
        let entry = entry.context(ListDirSnafu { path: dir })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(suffix) = rotation_suffix(name, base) {
            matches.push((entry.path(), suffix));
        }
    }
    Ok(matches)
}

/// Shift `path` and its numbered predecessors up by one, highest number
/// first so nothing is overwritten.
pub fn rotate_files(path: impl AsRef<Path>) -> Result<RotateReport> {
    let path = path.as_ref();
    let base = path
        .file_name()
        .and_then(|name| name.to_str())
        .context(MissingPathSnafu)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut matches = match_files(dir, base)?;
    matches.sort_by(|a, b| b.1.cmp(&a.1));

    let mut report = RotateReport::default();
    for (from, suffix) in matches {
        let next = suffix.map_or(1, |n| n + 1);
        let to = dir.join(format!("{base}.{next}"));
        if let Err(err) = rename(&from, &to) {
            report.errors.push(err);
            continue;
        }
        report.renamed.push(to.clone());

        if let Err(err) = rename(&sidecar_path(&from), &sidecar_path(&to))
            && err.io_kind() != Some(io::ErrorKind::NotFound)
        {
            report.errors.push(err);
        }
    }
    Ok(report)
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => {
            debug!(from = %from.display(), to = %to.display(), "rotated");
            Ok(())
        }
        Err(source) => {
            let err = RenameSnafu { from, to }.into_error(source);
            if err.io_kind() != Some(io::ErrorKind::NotFound) {
                warn!(error = %err, "rotation step failed");
            }
            Err(err)
        }
    }
}
