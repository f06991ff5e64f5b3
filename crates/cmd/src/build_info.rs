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

use shadow_rs::{formatcp, shadow};

shadow!(build);

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");

/// `<version>` for release builds (`LINEFIFO_RELEASE` set at compile time),
/// otherwise `<version>-dev+<commit>` with `-dirty` for uncommitted trees.
#[allow(clippy::const_is_empty)]
pub const VERSION: &str = if option_env!("LINEFIFO_RELEASE").is_some() {
    build::PKG_VERSION
} else if build::SHORT_COMMIT.is_empty() {
    formatcp!("{}-dev", build::PKG_VERSION)
} else if build::GIT_CLEAN {
    formatcp!("{}-dev+{}", build::PKG_VERSION, build::SHORT_COMMIT)
} else {
    formatcp!("{}-dev+{}-dirty", build::PKG_VERSION, build::SHORT_COMMIT)
};

/// Shown by `--version`.
pub const LONG_VERSION: &str = formatcp!(
    "{}\ncommit: {}\nbranch: {}\nbuilt: {}\nrustc: {}\ntarget: {}",
    VERSION,
    build::COMMIT_HASH,
    build::BRANCH,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::BUILD_TARGET,
);
