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

use std::{thread::available_parallelism, time::Duration};

use bon::Builder;
use smart_default::SmartDefault;

/// Scheduler flavor of a runtime built by [`RuntimeOptions::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimeFlavor {
    /// Everything async runs on the calling thread; file I/O still goes to
    /// the blocking pool.
    #[default]
    CurrentThread,
    MultiThread,
}

/// Settings for the runtime that drives fifo handles.
///
/// Physical reads, writes and opens run on Tokio's blocking pool, so the
/// pool size bounds how many files can be touched at once.
#[derive(Debug, Clone, SmartDefault, Builder)]
#[builder(finish_fn = build)]
pub struct RuntimeOptions {
    #[builder(default)]
    pub flavor: RuntimeFlavor,

    /// Worker threads of a multi-thread runtime. Defaults to the CPU count.
    pub worker_threads: Option<usize>,

    #[default("linefifo-rt".to_string())]
    #[builder(default = "linefifo-rt".to_string(), into)]
    pub thread_name: String,

    #[default(32)]
    #[builder(default = 32)]
    pub max_blocking_threads: usize,

    /// Idle time after which a blocking-pool thread exits.
    #[default(Duration::from_secs(10))]
    #[builder(default = Duration::from_secs(10))]
    pub blocking_keep_alive: Duration,
}

pub(crate) fn cpu_threads() -> usize {
    available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1)
        .max(1)
}
